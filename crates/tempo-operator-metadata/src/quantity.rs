//!
//! # Resource quantities
//!
//! Minimal support for Kubernetes resource quantities: enough to split a total
//! cpu/memory budget across components and to compare storage sizes.
//!
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,
    #[error("invalid number in quantity '{0}'")]
    InvalidNumber(String),
    #[error("unknown suffix in quantity '{0}'")]
    UnknownSuffix(String),
    #[error("quantity '{0}' is out of range")]
    OutOfRange(String),
}

/// largest value that converts to integer base units without loss
pub const MAX_QUANTITY_VALUE: f64 = 9_007_199_254_740_992.0;

const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ei", 1_152_921_504_606_846_976.0),
];

const DECIMAL_SUFFIXES: [(&str, f64); 9] = [
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// parse a quantity into its value in base units (cores, bytes)
pub fn parse_quantity(raw: &str) -> Result<f64, QuantityError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(QuantityError::Empty);
    }

    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);

    // plain exponent form such as 1e3
    if let Some(exp) = suffix.strip_prefix(['e', 'E']) {
        if !exp.is_empty() && exp.chars().all(|c| c.is_ascii_digit() || c == '-') {
            return raw
                .parse::<f64>()
                .map_err(|_| QuantityError::InvalidNumber(raw.to_owned()));
        }
    }

    let value: f64 = number
        .parse()
        .map_err(|_| QuantityError::InvalidNumber(raw.to_owned()))?;

    if suffix.is_empty() {
        return Ok(value);
    }

    BINARY_SUFFIXES
        .iter()
        .chain(DECIMAL_SUFFIXES.iter())
        .find(|(name, _)| *name == suffix)
        .map(|(_, multiplier)| value * multiplier)
        .ok_or_else(|| QuantityError::UnknownSuffix(raw.to_owned()))
}

/// value of a typed quantity in base units
pub fn quantity_value(quantity: &Quantity) -> Result<f64, QuantityError> {
    parse_quantity(&quantity.0)
}

/// value of a typed quantity, rejecting negative, non finite and oversized values
pub fn bounded_quantity_value(quantity: &Quantity) -> Result<f64, QuantityError> {
    let value = quantity_value(quantity)?;
    if value.is_finite() && (0.0..=MAX_QUANTITY_VALUE).contains(&value) {
        Ok(value)
    } else {
        Err(QuantityError::OutOfRange(quantity.0.clone()))
    }
}

/// canonical cpu quantity from millicores
pub fn cpu_from_millis(millis: u64) -> Quantity {
    if millis % 1000 == 0 {
        Quantity(format!("{}", millis / 1000))
    } else {
        Quantity(format!("{millis}m"))
    }
}

/// canonical memory quantity from bytes, using the largest exact binary suffix
pub fn memory_from_bytes(bytes: u64) -> Quantity {
    if bytes == 0 {
        return Quantity("0".to_owned());
    }
    for (suffix, multiplier) in BINARY_SUFFIXES.iter().rev() {
        let multiplier = *multiplier as u64;
        if bytes % multiplier == 0 {
            return Quantity(format!("{}{suffix}", bytes / multiplier));
        }
    }
    Quantity(bytes.to_string())
}

#[cfg(test)]
mod test {

    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("1000m"), Ok(1.0));
        assert_eq!(parse_quantity("2"), Ok(2.0));
        assert_eq!(parse_quantity("2Gi"), Ok(2_147_483_648.0));
        assert_eq!(parse_quantity("10G"), Ok(10e9));
        assert_eq!(parse_quantity("1e3"), Ok(1000.0));
        assert_eq!(parse_quantity("0Gi"), Ok(0.0));
        assert_eq!(parse_quantity(""), Err(QuantityError::Empty));
        assert!(matches!(
            parse_quantity("5Zi"),
            Err(QuantityError::UnknownSuffix(_))
        ));
        assert!(matches!(
            parse_quantity("abc"),
            Err(QuantityError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_bounded_quantity_value() {
        let quantity = |raw: &str| Quantity(raw.to_owned());
        assert_eq!(bounded_quantity_value(&quantity("4Gi")), Ok(4_294_967_296.0));
        assert_eq!(bounded_quantity_value(&quantity("0")), Ok(0.0));
        assert_eq!(
            bounded_quantity_value(&quantity("1E")),
            Err(QuantityError::OutOfRange("1E".to_owned()))
        );
        assert_eq!(
            bounded_quantity_value(&quantity("-1Gi")),
            Err(QuantityError::OutOfRange("-1Gi".to_owned()))
        );
        assert_eq!(
            bounded_quantity_value(&quantity("1e400")),
            Err(QuantityError::OutOfRange("1e400".to_owned()))
        );
    }

    #[test]
    fn test_canonical_forms() {
        assert_eq!(cpu_from_millis(2000), Quantity("2".to_owned()));
        assert_eq!(cpu_from_millis(260), Quantity("260m".to_owned()));
        assert_eq!(memory_from_bytes(1_073_741_824), Quantity("1Gi".to_owned()));
        assert_eq!(memory_from_bytes(1_536 * 1024), Quantity("1536Ki".to_owned()));
        assert_eq!(memory_from_bytes(1000), Quantity("1000".to_owned()));
    }
}
