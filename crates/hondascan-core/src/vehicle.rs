//! Vehicle identification

/// VINs shorter than this are treated as noise
const MIN_VIN_LEN: usize = 6;

/// Substring rules, later matches win
const MODEL_RULES: &[(MatchKind, &str, &str)] = &[
    (MatchKind::Prefix, "9C2", "Honda (Brasil)"),
    (MatchKind::Contains, "KC", "Honda CG 150/160"),
    (MatchKind::Contains, "KD", "Honda CB 250/300"),
];

#[derive(Debug, Clone, Copy)]
enum MatchKind {
    Prefix,
    Contains,
}

/// Resolve a model label from a VIN
///
/// Returns `None` when the VIN is too short to say anything.
pub fn identify_model(vin: &str) -> Option<String> {
    if vin.len() < MIN_VIN_LEN {
        return None;
    }

    let mut model = "Honda";
    for (kind, pattern, label) in MODEL_RULES {
        let hit = match kind {
            MatchKind::Prefix => vin.starts_with(pattern),
            MatchKind::Contains => vin.contains(pattern),
        };
        if hit {
            model = label;
        }
    }
    Some(model.to_string())
}
