//! Heuristic enrichment of parsed listings.
//!
//! Fills the soft fields a parser could not structure: pet policy, metro
//! distance and renovation class, all derived from free text. Rules are
//! plain data tables so they can be extended without touching control flow.

use crate::models::{Listing, PetPolicy, Renovation};
use regex::Regex;
use std::sync::OnceLock;

/// Phrases that explicitly forbid pets. A prohibition anywhere in the text
/// overrides an affirmative mention elsewhere.
const PET_BAN_PHRASES: &[&str] = &[
    "без животных",
    "без домашних животных",
    "животные запрещены",
    "не с животными",
    "без питомцев",
    "питомцы запрещены",
    "животных не держать",
    "без кошек",
    "без собак",
    "кошек и собак не держать",
    "проживание с животными запрещено",
    "проживание с животными не допускается",
    "животных не заводить",
    "no pets",
];

const PET_OK_PHRASES: &[&str] = &[
    "можно с животными",
    "можно с питомцами",
    "с животными можно",
    "с питомцами можно",
    "животные приветствуются",
    "можно с кошкой",
    "можно с собакой",
    "pets allowed",
];

/// Source vocabulary for renovation classes found in descriptions.
const RENOVATION_RULES: &[(&str, Renovation)] = &[
    ("косметический ремонт", Renovation::Cosmetic),
    ("евроремонт", Renovation::Euro),
    ("евро ремонт", Renovation::Euro),
    ("дизайнерский ремонт", Renovation::Designer),
    ("без ремонта", Renovation::NoRenovation),
];

/// Fixed walking speed for meter-only distance figures.
const METERS_PER_MINUTE: f64 = 80.0;

/// Applies all heuristics to a parsed listing. Pure: structured values
/// already present win over anything derived from text.
pub fn enrich(listing: Listing) -> Listing {
    let description = listing.description.to_lowercase();

    let pets = match listing.pets {
        PetPolicy::Unknown => pet_policy_from_text(&description),
        known => known,
    };

    let metro_minutes = listing
        .metro_minutes
        .or_else(|| metro_minutes_from_text(&description));

    let renovation = match listing.renovation {
        Renovation::Unknown => renovation_from_text(&description),
        known => known,
    };

    Listing {
        pets,
        metro_minutes,
        renovation,
        ..listing
    }
}

/// Negative keywords take precedence over positive ones; no keyword at all
/// yields Unknown rather than a guess.
fn pet_policy_from_text(text: &str) -> PetPolicy {
    if PET_BAN_PHRASES.iter().any(|p| text.contains(p)) {
        PetPolicy::Forbidden
    } else if PET_OK_PHRASES.iter().any(|p| text.contains(p)) {
        PetPolicy::Allowed
    } else {
        PetPolicy::Unknown
    }
}

fn minutes_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,2})\s*мин(?:ут[ы]?|\.)?\s*(?:пешком\s*)?(?:до|от)\s*метро")
            .expect("static regex")
    })
}

fn meters_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{2,4})\s*м(?:етр(?:ов|а)?)?\s*(?:до|от)\s*метро").expect("static regex")
    })
}

/// Parses free-text metro distance into minutes on foot. Meter figures are
/// converted at a fixed walking speed, rounded up. Unparseable text yields
/// None, never zero.
fn metro_minutes_from_text(text: &str) -> Option<u32> {
    if let Some(caps) = minutes_re().captures(text) {
        return caps[1].parse::<u32>().ok().filter(|m| *m > 0);
    }
    if let Some(caps) = meters_re().captures(text) {
        let meters = caps[1].parse::<f64>().ok()?;
        if meters > 0.0 {
            return Some((meters / METERS_PER_MINUTE).ceil() as u32);
        }
    }
    None
}

fn renovation_from_text(text: &str) -> Renovation {
    for (phrase, renovation) in RENOVATION_RULES {
        if text.contains(phrase) {
            return *renovation;
        }
    }
    Renovation::Unknown
}
