/// Normalise a city name into the slug used for folder and file names
/// ("Cox's Bazar" -> "coxs_bazar")
pub fn city_slug(city_name: &str) -> String {
    city_name
        .trim()
        .replace(' ', "_")
        .replace('\'', "")
        .to_lowercase()
}

/// Truncate an elevation towards zero for bin labels
pub fn label_int(value: f64) -> i64 {
    value.trunc() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_city_slug() {
        assert_eq!(city_slug("Cox's Bazar"), "coxs_bazar");
        assert_eq!(city_slug("Addis Ababa"), "addis_ababa");
        assert_eq!(city_slug("  Lima "), "lima");
    }

    #[test]
    fn test_label_int_truncates() {
        assert_eq!(label_int(20.0), 20);
        assert_eq!(label_int(19.9), 19);
        assert_eq!(label_int(-4.5), -4);
    }
}
