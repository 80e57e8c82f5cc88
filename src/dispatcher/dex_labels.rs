//! DEX-program label inference: a fixed case-insensitive lookup table
//! matched against the webhook payload's `source` or `description`.

const TABLE: &[(&str, &str)] = &[
    ("PUMP_FUN", "Pump.fun"),
    ("PUMPFUN", "Pump.fun"),
    ("RAYDIUM", "Raydium"),
    ("JUPITER", "Jupiter"),
    ("ORCA", "Orca"),
    ("METEORA", "Meteora"),
    ("PHOENIX", "Phoenix"),
    ("OPENBOOK", "OpenBook"),
];

/// Returns the first table entry whose key appears in `source` or
/// `description` (case-insensitive), or `None` if nothing matches.
pub fn infer(source: &str, description: &str) -> Option<String> {
    let haystack = format!("{source} {description}").to_uppercase();
    TABLE
        .iter()
        .find(|(key, _)| haystack.contains(key))
        .map(|(_, label)| label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_case_insensitively() {
        assert_eq!(infer("pump_fun", ""), Some("Pump.fun".to_string()));
        assert_eq!(infer("", "Swap via raydium AMM"), Some("Raydium".to_string()));
    }

    #[test]
    fn unknown_source_is_none() {
        assert_eq!(infer("SOME_OTHER_DEX", "nothing"), None);
    }
}
