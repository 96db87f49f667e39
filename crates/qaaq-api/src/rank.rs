//! Free-text shipboard ranks ("C/E", "2nd Mate", "Chief Engg") mapped to
//! the seeded rank group keys.

const CREW_WORDS: &[&str] = &[
    "bosun", "boatswain", "ab", "able", "os", "ordinary", "oiler", "fitter", "wiper", "cook",
    "steward", "motorman", "pumpman", "rating", "crew", "seaman", "deckhand",
];

pub fn normalize_rank(raw: &str) -> Option<&'static str> {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    let has = |w: &str| words.contains(&w);

    // Slash abbreviations collapse to two characters: c/e, 2/o, 3/e
    match words.concat().as_str() {
        "ce" => return Some("chief_engineer"),
        "co" | "cm" => return Some("chief_officer"),
        "2e" => return Some("second_engineer"),
        "3e" => return Some("third_engineer"),
        "4e" => return Some("fourth_engineer"),
        "2o" | "2m" => return Some("second_officer"),
        "3o" | "3m" => return Some("third_officer"),
        "eto" | "eo" => return Some("eto"),
        "ab" | "os" => return Some("crew"),
        _ => {}
    }

    if has("cadet") || has("trainee") || has("apprentice") {
        return Some("cadet");
    }
    if has("eto") || words.iter().any(|w| w.starts_with("electr")) {
        return Some("eto");
    }

    let ordinal = if has("chief") || has("1st") || has("first") {
        Some(1)
    } else if has("2nd") || has("second") || has("2") {
        Some(2)
    } else if has("3rd") || has("third") || has("3") {
        Some(3)
    } else if has("4th") || has("fourth") || has("4") || has("junior") {
        Some(4)
    } else {
        None
    };

    let engine = words.iter().any(|w| w.starts_with("eng"));
    let deck = words.iter().any(|w| w.starts_with("officer") || *w == "mate" || *w == "off");

    if engine {
        return match ordinal {
            Some(1) => Some("chief_engineer"),
            Some(2) => Some("second_engineer"),
            Some(3) => Some("third_engineer"),
            Some(4) => Some("fourth_engineer"),
            _ => None,
        };
    }
    if deck {
        return match ordinal {
            Some(1) => Some("chief_officer"),
            Some(2) => Some("second_officer"),
            Some(3) => Some("third_officer"),
            _ => None,
        };
    }
    if has("master") || has("captain") || has("capt") || has("skipper") {
        return Some("master");
    }
    if words.iter().any(|w| CREW_WORDS.contains(w)) {
        return Some("crew");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviations() {
        assert_eq!(normalize_rank("C/E"), Some("chief_engineer"));
        assert_eq!(normalize_rank("2/O"), Some("second_officer"));
        assert_eq!(normalize_rank("3/E"), Some("third_engineer"));
        assert_eq!(normalize_rank("C/O"), Some("chief_officer"));
        assert_eq!(normalize_rank("ETO"), Some("eto"));
    }

    #[test]
    fn spelled_out_ranks() {
        assert_eq!(normalize_rank("Captain"), Some("master"));
        assert_eq!(normalize_rank("Master Mariner"), Some("master"));
        assert_eq!(normalize_rank("Chief Engg"), Some("chief_engineer"));
        assert_eq!(normalize_rank("2nd Mate"), Some("second_officer"));
        assert_eq!(normalize_rank("Third Officer"), Some("third_officer"));
        assert_eq!(normalize_rank("Junior Engineer"), Some("fourth_engineer"));
        assert_eq!(normalize_rank("Electro-Technical Officer"), Some("eto"));
        assert_eq!(normalize_rank("Engine Cadet"), Some("cadet"));
        assert_eq!(normalize_rank("Chief Cook"), Some("crew"));
        assert_eq!(normalize_rank("Bosun"), Some("crew"));
    }

    #[test]
    fn unknown_ranks() {
        assert_eq!(normalize_rank(""), None);
        assert_eq!(normalize_rank("Superintendent"), None);
        assert_eq!(normalize_rank("Engineer"), None);
    }
}
