use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Canonical metric keys and their known CSV header aliases
// ---------------------------------------------------------------------------

pub const TIMESTAMP: &str = "timestamp";
pub const FLAGS: &str = "flags";

/// `(canonical key, aliases)`; aliases are tried in order, case-insensitively.
pub const ALIAS_MAP: &[(&str, &[&str])] = &[
    ("timestamp", &["Timestamp", "timestamp", "time", "epoch", "ts"]),
    ("flags", &["FLAGS", "flags"]),
    ("co2", &["CO2", "co2", "co2_ppm"]),
    ("co2_uncomp", &["CO2_UNCOMP", "co2_uncomp"]),
    ("pm1_0", &["PM1.0", "PM1", "pm1_0"]),
    ("pm2_5", &["PM2.5", "PM2_5", "pm2_5"]),
    ("pm4_0", &["PM4.0", "PM4", "pm4_0"]),
    ("pm10", &["PM10", "PM10.0", "pm10"]),
    ("pn0_5", &["PN0.5", "PN0_5", "pn0_5"]),
    ("pn1_0", &["PN1.0", "PN1", "pn1_0"]),
    ("pn2_5", &["PN2.5", "PN2_5", "pn2_5"]),
    ("pn4_0", &["PN4.0", "PN4", "pn4_0"]),
    ("pn10_0", &["PN10.0", "PN10", "pn10_0"]),
    ("temp_c", &["TempC", "temp_c", "temperature"]),
    ("rh", &["RH", "rh", "humidity"]),
    ("pressure", &["PRESSURE", "pressure", "press"]),
    ("voc", &["VOC", "voc"]),
    ("nox", &["NOX", "nox"]),
];

/// Display order of the canonical columns.
pub const CANONICAL_ORDER: &[&str] = &[
    "timestamp",
    "flags",
    "co2",
    "co2_uncomp",
    "pm1_0",
    "pm2_5",
    "pm4_0",
    "pm10",
    "pn0_5",
    "pn1_0",
    "pn2_5",
    "pn4_0",
    "pn10_0",
    "temp_c",
    "rh",
    "voc",
    "nox",
    "pressure",
];

pub const PM_COLUMNS: &[&str] = &["pm1_0", "pm2_5", "pm4_0", "pm10"];
pub const PN_COLUMNS: &[&str] = &["pn0_5", "pn1_0", "pn2_5", "pn4_0", "pn10_0"];

/// Map canonical key → original header for every canonical key that one of
/// the headers matches. Unmatched headers are simply absent from the result.
pub fn normalize_columns<S: AsRef<str>>(headers: &[S]) -> BTreeMap<String, String> {
    // Later duplicates (case-insensitively) shadow earlier ones.
    let lower: BTreeMap<String, &str> = headers
        .iter()
        .map(|h| (h.as_ref().to_lowercase(), h.as_ref()))
        .collect();

    let mut normalized = BTreeMap::new();
    for (canonical, aliases) in ALIAS_MAP {
        if let Some(original) = aliases
            .iter()
            .find_map(|alias| lower.get(&alias.to_lowercase()))
        {
            normalized.insert(canonical.to_string(), original.to_string());
        }
    }
    normalized
}

// ---------------------------------------------------------------------------
// Column classes – decide which validity rules apply
// ---------------------------------------------------------------------------

/// Physical class of a canonical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnClass {
    Timestamp,
    /// Bitfield of device status flags.
    Flags,
    ParticleMass,
    ParticleCount,
    /// VOC / NOx index channels.
    GasIndex,
    Co2Uncompensated,
    /// Everything else: co2, temperature, humidity, pressure and unknown
    /// pass-through columns.
    Other,
}

impl ColumnClass {
    pub fn of(column: &str) -> Self {
        match column {
            TIMESTAMP => ColumnClass::Timestamp,
            FLAGS => ColumnClass::Flags,
            "voc" | "nox" => ColumnClass::GasIndex,
            "co2_uncomp" => ColumnClass::Co2Uncompensated,
            c if PM_COLUMNS.contains(&c) => ColumnClass::ParticleMass,
            c if PN_COLUMNS.contains(&c) => ColumnClass::ParticleCount,
            _ => ColumnClass::Other,
        }
    }

    /// Particulate mass or count channel.
    pub fn is_particulate(self) -> bool {
        matches!(self, ColumnClass::ParticleMass | ColumnClass::ParticleCount)
    }
}

/// Axis label (with unit) for a canonical metric.
pub fn metric_label(key: &str) -> Option<&'static str> {
    let label = match key {
        "co2" => "CO2 (ppm)",
        "co2_uncomp" => "CO2 raw (ppm)",
        "pm1_0" => "PM1.0 (ug/m3)",
        "pm2_5" => "PM2.5 (ug/m3)",
        "pm4_0" => "PM4.0 (ug/m3)",
        "pm10" => "PM10 (ug/m3)",
        "pn0_5" => "PN0.5 (#/cm3)",
        "pn1_0" => "PN1.0 (#/cm3)",
        "pn2_5" => "PN2.5 (#/cm3)",
        "pn4_0" => "PN4.0 (#/cm3)",
        "pn10_0" => "PN10 (#/cm3)",
        "temp_c" => "Temperature (C)",
        "rh" => "Relative humidity (%)",
        "pressure" => "Pressure (hPa)",
        "voc" => "VOC index",
        "nox" => "NOx index",
        "flags" => "Status flags",
        _ => return None,
    };
    Some(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_case_insensitively() {
        let headers = ["TIMESTAMP", "Co2", "pm2.5", "TempC", "mystery"];
        let map = normalize_columns(&headers);
        assert_eq!(map["timestamp"], "TIMESTAMP");
        assert_eq!(map["co2"], "Co2");
        assert_eq!(map["pm2_5"], "pm2.5");
        assert_eq!(map["temp_c"], "TempC");
        assert_eq!(map.len(), 4);
        assert!(!map.values().any(|v| v == "mystery"));
    }

    #[test]
    fn first_alias_wins() {
        // Both "PM10" and "pm10.0" resolve to pm10; the first alias in the list
        // ("PM10") is preferred.
        let map = normalize_columns(&["ts", "PM10.0", "PM10"]);
        assert_eq!(map["pm10"], "PM10");
        assert_eq!(map["timestamp"], "ts");
    }

    #[test]
    fn classes() {
        assert_eq!(ColumnClass::of("pm2_5"), ColumnClass::ParticleMass);
        assert_eq!(ColumnClass::of("pn10_0"), ColumnClass::ParticleCount);
        assert_eq!(ColumnClass::of("nox"), ColumnClass::GasIndex);
        assert_eq!(ColumnClass::of("co2"), ColumnClass::Other);
        assert!(ColumnClass::of("pn0_5").is_particulate());
        assert!(!ColumnClass::of("flags").is_particulate());
    }
}
