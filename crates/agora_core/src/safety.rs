//! In-world content filter.
//!
//! Outgoing speech must stay inside the fiction. Any text that talks about
//! models, systems, servers, prompts or tests is treated as meta content and
//! never reaches the world.

use regex::Regex;
use std::sync::LazyLock;

// Short tokens must match as whole words ("ia" must not hit "gracias").
// Stems match as word prefixes ("coordenad" hits "coordenadas").
static META_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(modelo|llm|ia|ai|sistema|servidor|api|oauth|prueba|test|prompt|ciclo)s?\b|\b(coordenad|estabilidad|monitoreo|instrucci[oó]n|instruccion|par[aá]metro|secuencia|diagnostic|observaci[oó]n)",
    )
    .expect("meta word pattern is valid")
});

/// True when `text` mentions out-of-world concepts.
pub fn is_meta_content(text: &str) -> bool {
    META_WORDS.is_match(text)
}
