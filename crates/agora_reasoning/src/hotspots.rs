//! Named places the citizen heads to when it has nothing specific to do.

use agora_core::Position;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::intent::Intent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hotspot {
    pub name: &'static str,
    pub position: Position,
}

const fn spot(name: &'static str, x: i64, y: i64) -> Hotspot {
    Hotspot {
        name,
        position: Position { x, y },
    }
}

pub const PLAZA: Hotspot = spot("plaza", 16, 18);
pub const CAFE: Hotspot = spot("cafe", 14, 8);
pub const MARKET: Hotspot = spot("market", 36, 28);
pub const CITY_HALL: Hotspot = spot("cityhall", 28, 22);
pub const SHOP: Hotspot = spot("shop", 30, 14);
pub const LIBRARY: Hotspot = spot("library", 24, 6);
pub const PARK: Hotspot = spot("park", 40, 42);
pub const GALLERY: Hotspot = spot("gallery", 50, 8);
pub const INN: Hotspot = spot("inn", 52, 42);

const SOCIAL: [Hotspot; 3] = [PLAZA, CAFE, MARKET];
const WORK: [Hotspot; 3] = [CITY_HALL, SHOP, LIBRARY];
const LEISURE: [Hotspot; 3] = [PARK, GALLERY, LIBRARY];

/// Probability of steering away from the previous pick.
const AVOID_REPEAT: f64 = 0.6;

pub fn hotspots_for(intent: Intent) -> &'static [Hotspot] {
    match intent {
        Intent::Social => &SOCIAL,
        Intent::Work => &WORK,
        Intent::Leisure => &LEISURE,
    }
}

/// Random hotspot for `intent`, usually not the same as `last`.
pub fn pick<R: Rng + ?Sized>(intent: Intent, last: Option<&str>, rng: &mut R) -> Hotspot {
    let options = hotspots_for(intent);
    let filtered: Vec<Hotspot> = match last {
        Some(last) if rng.gen_bool(AVOID_REPEAT) => {
            options.iter().copied().filter(|h| h.name != last).collect()
        }
        _ => options.to_vec(),
    };
    let pool = if filtered.is_empty() { options.to_vec() } else { filtered };
    *pool.choose(rng).unwrap_or(&PLAZA)
}

/// Hotspot choice with memory of the previous pick.
#[derive(Debug, Clone)]
pub struct HotspotPicker {
    last: Option<&'static str>,
    rng: StdRng,
}

impl HotspotPicker {
    pub fn new(rng: StdRng) -> Self {
        Self { last: None, rng }
    }

    pub fn next(&mut self, intent: Intent) -> Position {
        let hotspot = pick(intent, self.last, &mut self.rng);
        self.last = Some(hotspot.name);
        hotspot.position
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// Place names a free-text location may use, in match order.
const PLACE_WORDS: &[(&str, Hotspot)] = &[
    ("plaza central", PLAZA),
    ("plaza", PLAZA),
    ("café", CAFE),
    ("cafe", CAFE),
    ("mercado", MARKET),
    ("market", MARKET),
    ("biblioteca", LIBRARY),
    ("library", LIBRARY),
    ("galer", GALLERY),
    ("parque", PARK),
    ("park", PARK),
    ("jardín", PARK),
    ("jardin", PARK),
    ("posada", INN),
    ("inn", INN),
    ("tienda", SHOP),
    ("shop", SHOP),
];

/// Exact place name, as a generated `location` parameter would give it.
pub fn named_place(name: &str) -> Option<Position> {
    let name = name.trim().to_lowercase();
    PLACE_WORDS
        .iter()
        .find(|(word, _)| *word == name)
        .map(|(_, h)| h.position)
}

/// First known place mentioned anywhere in `text`.
pub fn mentioned_place(text: &str) -> Option<Position> {
    let text = text.to_lowercase();
    PLACE_WORDS
        .iter()
        .find(|(word, _)| text.contains(word))
        .map(|(_, h)| h.position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_pick_stays_in_category() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let h = pick(Intent::Work, Some("shop"), &mut rng);
            assert!(WORK.contains(&h));
        }
    }

    #[test]
    fn test_pick_avoids_last_more_often_than_not() {
        let mut rng = StdRng::seed_from_u64(42);
        let repeats = (0..600)
            .filter(|_| pick(Intent::Social, Some("plaza"), &mut rng).name == "plaza")
            .count();
        // Uniform would give ~200; avoidance brings it near 80.
        assert!(repeats < 150, "plaza picked {repeats} times");
    }

    #[test]
    fn test_picker_remembers_last() {
        let mut picker = HotspotPicker::new(StdRng::seed_from_u64(3));
        let first = picker.next(Intent::Leisure);
        assert!(LEISURE.iter().any(|h| h.position == first));
        assert!(picker.last.is_some());
    }

    #[test]
    fn test_place_lookup() {
        assert_eq!(named_place("Plaza Central"), Some(PLAZA.position));
        assert_eq!(named_place("biblioteca"), Some(LIBRARY.position));
        assert_eq!(named_place("castillo"), None);
        assert_eq!(mentioned_place("nos vemos en la galería"), Some(GALLERY.position));
        assert_eq!(mentioned_place("en la Posada"), Some(INN.position));
    }
}
