//! Static city registry shared by all scrapers.
//!
//! Each entry carries the region id used by Cian's `region=` parameter and
//! the transliterated slug used in Yandex Realty and Avito URLs.

/// City from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct City {
    pub name: &'static str,
    pub cian_region: u32,
    pub slug: &'static str,
}

pub const CITIES: &[City] = &[
    City { name: "Москва", cian_region: 1, slug: "moskva" },
    City { name: "Санкт-Петербург", cian_region: 2, slug: "sankt-peterburg" },
    City { name: "Новосибирск", cian_region: 4897, slug: "novosibirsk" },
    City { name: "Екатеринбург", cian_region: 4743, slug: "ekaterinburg" },
    City { name: "Казань", cian_region: 4777, slug: "kazan" },
    City { name: "Нижний Новгород", cian_region: 4749, slug: "nizhniy_novgorod" },
    City { name: "Краснодар", cian_region: 4820, slug: "krasnodar" },
    City { name: "Ростов-на-Дону", cian_region: 4959, slug: "rostov-na-donu" },
    City { name: "Самара", cian_region: 4966, slug: "samara" },
    City { name: "Воронеж", cian_region: 4713, slug: "voronezh" },
];

/// Looks a city up by name (case-insensitive) or by slug.
pub fn find_city(name: &str) -> Option<&'static City> {
    let needle = name.trim().to_lowercase();
    CITIES
        .iter()
        .find(|c| c.name.to_lowercase() == needle || c.slug == needle)
}

/// Registry lookup with a Moscow fallback for cities we do not know,
/// matching the sources' own default region.
pub fn city_or_default(name: &str) -> &'static City {
    find_city(name).unwrap_or(&CITIES[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_slug() {
        assert_eq!(find_city("Казань").unwrap().slug, "kazan");
        assert_eq!(find_city("kazan").unwrap().cian_region, 4777);
        assert_eq!(find_city("КАЗАНЬ").unwrap().slug, "kazan");
        assert!(find_city("Атлантида").is_none());
    }

    #[test]
    fn unknown_city_falls_back_to_moscow() {
        assert_eq!(city_or_default("Атлантида").slug, "moskva");
    }
}
