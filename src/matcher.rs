//! Pure predicate deciding whether a listing satisfies a user filter.
//!
//! All constraints are conjunctive, empty/unset fields always match, and
//! range bounds are inclusive. Soft fields (pets, renovation) that come
//! back Unknown fail an actively-set constraint: a tri-state the system
//! cannot verify must not slip past a user who asked for it explicitly.

use crate::models::{Listing, PetPolicy, Renovation, UserFilter};

pub fn matches(listing: &Listing, filter: &UserFilter) -> bool {
    if !filter.enabled_sources.is_empty() && !filter.enabled_sources.contains(&listing.source) {
        return false;
    }

    let wanted_city = filter.city.trim();
    if !wanted_city.is_empty() && listing.city.to_lowercase() != wanted_city.to_lowercase() {
        return false;
    }

    if let Some(min) = filter.price_min {
        if listing.price < min {
            return false;
        }
    }
    if let Some(max) = filter.price_max {
        if listing.price > max {
            return false;
        }
    }

    if let Some(min) = filter.area_min {
        if listing.area_m2 < min {
            return false;
        }
    }
    if let Some(max) = filter.area_max {
        if listing.area_m2 > max {
            return false;
        }
    }

    if let Some(min) = filter.kitchen_min {
        // A listing that never reported its kitchen cannot prove it fits.
        match listing.kitchen_area_m2 {
            Some(kitchen) if kitchen >= min => {}
            _ => return false,
        }
    }

    if !filter.rooms.is_empty() && !filter.rooms.contains(&listing.rooms) {
        return false;
    }

    if !filter.renovation_types.is_empty() {
        if listing.renovation == Renovation::Unknown
            || !filter.renovation_types.contains(&listing.renovation)
        {
            return false;
        }
    }

    if filter.no_commission_only && !listing.no_commission {
        return false;
    }

    if filter.pets_required && listing.pets != PetPolicy::Allowed {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;

    fn listing() -> Listing {
        Listing {
            source: Source::Cian,
            external_id: "1".to_string(),
            url: String::new(),
            title: String::new(),
            price: 45_000,
            rooms: 1,
            area_m2: 40.0,
            kitchen_area_m2: Some(10.0),
            city: "Москва".to_string(),
            renovation: Renovation::Euro,
            pets: PetPolicy::Allowed,
            metro_station: None,
            metro_minutes: Some(7),
            no_commission: true,
            photo_url: None,
            description: String::new(),
            posted_at: None,
        }
    }

    fn filter() -> UserFilter {
        UserFilter::new(42, "Москва")
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches(&listing(), &filter()));
    }

    #[test]
    fn combined_rooms_price_and_pets_constraints() {
        let mut f = filter();
        f.rooms = vec![1, 2];
        f.price_min = Some(0);
        f.price_max = Some(50_000);
        f.pets_required = true;

        let l = listing();
        assert!(matches(&l, &f));

        let mut unknown_pets = l.clone();
        unknown_pets.pets = PetPolicy::Unknown;
        assert!(!matches(&unknown_pets, &f));

        let mut expensive = l.clone();
        expensive.price = 60_000;
        assert!(!matches(&expensive, &f));
    }

    #[test]
    fn matcher_is_deterministic() {
        let l = listing();
        let f = filter();
        assert_eq!(matches(&l, &f), matches(&l, &f));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let mut f = filter();
        f.price_min = Some(45_000);
        f.price_max = Some(45_000);
        f.area_min = Some(40.0);
        f.area_max = Some(40.0);
        assert!(matches(&listing(), &f));
    }

    #[test]
    fn tightening_a_constraint_never_adds_matches() {
        let corpus: Vec<Listing> = (0..5)
            .map(|i| {
                let mut l = listing();
                l.external_id = i.to_string();
                l.price = 30_000 + i * 10_000;
                l
            })
            .collect();

        let mut wide = filter();
        wide.price_max = Some(70_000);
        let mut narrow = wide.clone();
        narrow.price_max = Some(50_000);

        for l in &corpus {
            if matches(l, &narrow) {
                assert!(matches(l, &wide));
            }
        }
    }

    #[test]
    fn unknown_renovation_fails_active_constraint() {
        let mut f = filter();
        f.renovation_types = vec![Renovation::Euro, Renovation::Designer];

        let mut l = listing();
        assert!(matches(&l, &f));
        l.renovation = Renovation::Unknown;
        assert!(!matches(&l, &f));
        l.renovation = Renovation::Cosmetic;
        assert!(!matches(&l, &f));
    }

    #[test]
    fn missing_kitchen_fails_kitchen_minimum() {
        let mut f = filter();
        f.kitchen_min = Some(8.0);

        let mut l = listing();
        assert!(matches(&l, &f));
        l.kitchen_area_m2 = None;
        assert!(!matches(&l, &f));
    }

    #[test]
    fn rooms_set_is_membership_with_empty_wildcard() {
        let mut f = filter();
        let mut l = listing();
        l.rooms = 0; // studio
        assert!(matches(&l, &f));

        f.rooms = vec![0, 3];
        assert!(matches(&l, &f));
        f.rooms = vec![2];
        assert!(!matches(&l, &f));
    }

    #[test]
    fn disabled_source_never_matches() {
        let mut f = filter();
        f.enabled_sources = vec![Source::Yandex];
        assert!(!matches(&listing(), &f));
    }

    #[test]
    fn commission_flag_checked_when_set() {
        let mut f = filter();
        f.no_commission_only = true;
        let mut l = listing();
        assert!(matches(&l, &f));
        l.no_commission = false;
        assert!(!matches(&l, &f));
    }

    #[test]
    fn city_mismatch_fails() {
        let mut l = listing();
        l.city = "Казань".to_string();
        assert!(!matches(&l, &filter()));
    }
}
