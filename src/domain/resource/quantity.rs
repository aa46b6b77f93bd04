use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Resource kinds tracked by the ledger and the pool quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Storage,
    Gpu,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [ResourceKind::Cpu, ResourceKind::Memory, ResourceKind::Storage, ResourceKind::Gpu];

    /// Suffix used by the `USER_*` and `K8_*` template variables.
    pub fn variable_suffix(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "CPU",
            ResourceKind::Memory => "MEMORY",
            ResourceKind::Storage => "STORAGE",
            ResourceKind::Gpu => "GPU",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.variable_suffix().to_ascii_lowercase())
    }
}

/// Amount of every resource kind.
///
/// Units: `cpu` in millicores, `memory` and `storage` in bytes, `gpu` in devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu: i64,
    pub memory: i64,
    pub storage: i64,
    pub gpu: i64,
}

impl ResourceVector {
    pub const ZERO: ResourceVector = ResourceVector { cpu: 0, memory: 0, storage: 0, gpu: 0 };

    pub fn new(cpu: i64, memory: i64, storage: i64, gpu: i64) -> Self {
        Self { cpu, memory, storage, gpu }
    }

    pub fn gpus(gpu: i64) -> Self {
        Self { gpu, ..Self::ZERO }
    }

    pub fn get(&self, kind: ResourceKind) -> i64 {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
            ResourceKind::Storage => self.storage,
            ResourceKind::Gpu => self.gpu,
        }
    }

    pub fn set(&mut self, kind: ResourceKind, value: i64) {
        match kind {
            ResourceKind::Cpu => self.cpu = value,
            ResourceKind::Memory => self.memory = value,
            ResourceKind::Storage => self.storage = value,
            ResourceKind::Gpu => self.gpu = value,
        }
    }

    /// True if `request` fits into `self` for every kind.
    pub fn fits(&self, request: &ResourceVector) -> bool {
        ResourceKind::ALL.iter().all(|k| request.get(*k) <= self.get(*k))
    }

    pub fn is_zero(&self) -> bool {
        ResourceKind::ALL.iter().all(|k| self.get(*k) == 0)
    }

    /// Component-wise maximum.
    pub fn max(&self, other: &ResourceVector) -> ResourceVector {
        let mut out = *self;
        for kind in ResourceKind::ALL {
            out.set(kind, self.get(kind).max(other.get(kind)));
        }
        out
    }

    /// Sort key for first-fit-decreasing placement.
    pub fn placement_key(&self) -> (i64, i64, i64) {
        (self.gpu, self.cpu, self.memory)
    }
}

impl Add for ResourceVector {
    type Output = ResourceVector;
    fn add(self, rhs: ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu + rhs.cpu,
            memory: self.memory + rhs.memory,
            storage: self.storage + rhs.storage,
            gpu: self.gpu + rhs.gpu,
        }
    }
}

impl AddAssign for ResourceVector {
    fn add_assign(&mut self, rhs: ResourceVector) {
        *self = *self + rhs;
    }
}

impl Sub for ResourceVector {
    type Output = ResourceVector;
    fn sub(self, rhs: ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu - rhs.cpu,
            memory: self.memory - rhs.memory,
            storage: self.storage - rhs.storage,
            gpu: self.gpu - rhs.gpu,
        }
    }
}

impl SubAssign for ResourceVector {
    fn sub_assign(&mut self, rhs: ResourceVector) {
        *self = *self - rhs;
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu={}m memory={}B storage={}B gpu={}", self.cpu, self.memory, self.storage, self.gpu)
    }
}

const BYTE_UNITS: [(&str, i64); 5] =
    [("Ti", 1 << 40), ("Gi", 1 << 30), ("Mi", 1 << 20), ("Ki", 1 << 10), ("B", 1)];

/// Splits a literal such as `16Gi` into its number and unit suffix.
fn split_unit(text: &str) -> (&str, &str) {
    let idx = text.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(text.len());
    (&text[..idx], &text[idx..])
}

fn parse_scaled(number: &str, scale: i64, original: &str) -> Result<i64> {
    if let Ok(value) = number.parse::<i64>() {
        return value.checked_mul(scale).ok_or_else(|| Error::QuantityParseError(original.to_string()));
    }
    let value: f64 = number.parse().map_err(|_| Error::QuantityParseError(original.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(Error::QuantityParseError(original.to_string()));
    }
    Ok((value * scale as f64).round() as i64)
}

/// Parses a byte quantity: `512`, `512B`, `4Ki`, `16Gi`, `1.5Ti`.
pub fn parse_bytes(text: &str) -> Result<i64> {
    let trimmed = text.trim();
    let (number, unit) = split_unit(trimmed);
    if number.is_empty() {
        return Err(Error::QuantityParseError(text.to_string()));
    }
    if unit.is_empty() {
        return parse_scaled(number, 1, text);
    }
    let scale = BYTE_UNITS
        .iter()
        .find(|(suffix, _)| *suffix == unit)
        .map(|(_, scale)| *scale)
        .ok_or_else(|| Error::QuantityParseError(text.to_string()))?;
    parse_scaled(number, scale, text)
}

/// Parses a CPU quantity into millicores: `2` -> 2000, `0.5` -> 500, `250m` -> 250.
pub fn parse_cpu(text: &str) -> Result<i64> {
    let trimmed = text.trim();
    match trimmed.strip_suffix('m') {
        Some(millis) => millis.parse::<i64>().map_err(|_| Error::QuantityParseError(text.to_string())),
        None => parse_scaled(trimmed, 1000, text),
    }
}

/// Parses a quantity of the given kind.
pub fn parse_quantity(kind: ResourceKind, text: &str) -> Result<i64> {
    match kind {
        ResourceKind::Cpu => parse_cpu(text),
        ResourceKind::Memory | ResourceKind::Storage => parse_bytes(text),
        ResourceKind::Gpu => text.trim().parse::<i64>().map_err(|_| Error::QuantityParseError(text.to_string())),
    }
}

/// Parses a duration such as `30`, `45s`, `10m`, `6h` or `2d` into seconds.
pub fn parse_duration(text: &str) -> Result<i64> {
    let trimmed = text.trim();
    let (number, unit) = split_unit(trimmed);
    let value: i64 = number.parse().map_err(|_| Error::DurationParseError(text.to_string()))?;
    let scale = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return Err(Error::DurationParseError(text.to_string())),
    };
    Ok(value * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_byte_units() {
        assert_eq!(parse_bytes("512").unwrap(), 512);
        assert_eq!(parse_bytes("512B").unwrap(), 512);
        assert_eq!(parse_bytes("4Ki").unwrap(), 4096);
        assert_eq!(parse_bytes("16Gi").unwrap(), 16 * (1 << 30));
        assert_eq!(parse_bytes("1.5Ti").unwrap(), 3 * (1 << 39));
        assert!(parse_bytes("16GB").is_err());
        assert!(parse_bytes("Gi").is_err());
    }

    #[test]
    fn parses_cpu_as_millicores() {
        assert_eq!(parse_cpu("2").unwrap(), 2000);
        assert_eq!(parse_cpu("0.5").unwrap(), 500);
        assert_eq!(parse_cpu("250m").unwrap(), 250);
        assert!(parse_cpu("two").is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("30").unwrap(), 30);
        assert_eq!(parse_duration("10m").unwrap(), 600);
        assert_eq!(parse_duration("6h").unwrap(), 21_600);
        assert_eq!(parse_duration("2d").unwrap(), 172_800);
        assert!(parse_duration("6w").is_err());
    }

    #[test]
    fn vector_fit_is_component_wise() {
        let free = ResourceVector::new(4000, 1 << 30, 0, 2);
        assert!(free.fits(&ResourceVector::new(4000, 1 << 30, 0, 2)));
        assert!(!free.fits(&ResourceVector::new(1000, 0, 1, 0)));
        assert_eq!((free - ResourceVector::gpus(2)).gpu, 0);
    }
}
