use alloc::string::{String, ToString};
use core::str::FromStr;
use log::{info, warn};

use crate::config::{
    MOUNT_POINT_SECONDARY, PartitionSpec, SECONDARY_PARTITION_NUMBER, StorageConfig,
};
use crate::error::ConfigError;

/// Parses a byte count: decimal, `0x` hex, with an optional K/M/G suffix.
pub fn parse_size(s: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidSize(s.to_string());

    let (digits, shift) = match s.as_bytes().last() {
        Some(b'K' | b'k') => (&s[..s.len() - 1], 10),
        Some(b'M' | b'm') => (&s[..s.len() - 1], 20),
        Some(b'G' | b'g') => (&s[..s.len() - 1], 30),
        _ => (s, 0),
    };

    let value = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).map_err(|_| invalid())?
    } else {
        digits.parse::<u64>().map_err(|_| invalid())?
    };

    value.checked_mul(1 << shift).ok_or_else(invalid)
}

pub fn parse_bool(s: &str) -> Result<bool, ConfigError> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool(s.to_string())),
    }
}

/// Parses an MBR type byte, e.g. `0x83` or `131`.
pub fn parse_part_type(s: &str) -> Result<u8, ConfigError> {
    let invalid = || ConfigError::InvalidType(s.to_string());
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).map_err(|_| invalid())?,
        None => s.parse::<u8>().map_err(|_| invalid())?,
    };
    if value == 0 {
        return Err(invalid());
    }
    Ok(value)
}

/// `<size>[@<start>]`
fn parse_extent(s: &str) -> Result<(u64, Option<u64>), ConfigError> {
    match s.split_once('@') {
        Some((size, start)) => Ok((parse_size(size)?, Some(parse_size(start)?))),
        None => Ok((parse_size(s)?, None)),
    }
}

fn parse_mount_point(s: &str) -> Result<&str, ConfigError> {
    if s.len() < 2 || !s.starts_with('/') {
        return Err(ConfigError::InvalidMountPoint(s.to_string()));
    }
    Ok(s)
}

impl StorageConfig {
    /// Builds a layout from whitespace-separated `storage.*` arguments:
    ///
    /// ```text
    /// storage.primary=4M storage.secondary=2M@4M storage.mount.primary=/sd
    /// storage.mount.secondary=/sd2 storage.auto_partition=yes storage.type=0x83
    /// ```
    ///
    /// The secondary partition defaults to starting where the primary ends.
    pub fn parse_from_bootargs(cmdline: &str) -> Result<Self, ConfigError> {
        let mut primary: Option<PartitionSpec> = None;
        let mut secondary: Option<PartitionSpec> = None;
        let mut secondary_start: Option<u64> = None;
        let mut part_type: Option<u8> = None;
        let mut primary_mount: Option<String> = None;
        let mut secondary_mount: Option<String> = None;
        let mut config = StorageConfig::single();

        for arg in cmdline.split_whitespace() {
            let Some((key, value)) = arg.split_once('=') else {
                warn!("Unknown storage argument: {}", arg);
                continue;
            };

            match key {
                "storage.primary" => {
                    info!("Parsing primary partition: {}", value);
                    let (size, start) = parse_extent(value)?;
                    let mut spec = PartitionSpec::primary(size);
                    spec.start = start.unwrap_or(0);
                    primary = Some(spec);
                }
                "storage.secondary" => {
                    info!("Parsing secondary partition: {}", value);
                    let (size, start) = parse_extent(value)?;
                    secondary_start = start;
                    secondary = Some(PartitionSpec::new(
                        SECONDARY_PARTITION_NUMBER,
                        0,
                        size,
                        MOUNT_POINT_SECONDARY,
                    ));
                }
                "storage.mount.primary" => {
                    primary_mount = Some(parse_mount_point(value)?.to_string());
                }
                "storage.mount.secondary" => {
                    secondary_mount = Some(parse_mount_point(value)?.to_string());
                }
                "storage.auto_partition" => {
                    config.auto_partition = parse_bool(value)?;
                }
                "storage.type" => {
                    part_type = Some(parse_part_type(value)?);
                }
                _ => warn!("Unknown storage argument: {}", arg),
            }
        }

        if primary.is_none() && primary_mount.is_some() {
            return Err(ConfigError::MissingPartition("storage.mount.primary".to_string()));
        }
        if secondary.is_none() && secondary_mount.is_some() {
            return Err(ConfigError::MissingPartition("storage.mount.secondary".to_string()));
        }

        match (primary, secondary) {
            (Some(mut primary), secondary) => {
                if let Some(part_type) = part_type {
                    primary.part_type = part_type;
                }
                if let Some(mount_point) = primary_mount {
                    primary.mount_point = mount_point;
                }
                let primary_end = primary.end();
                config.partitions.push(primary);

                if let Some(mut secondary) = secondary {
                    secondary.start = secondary_start.unwrap_or(primary_end);
                    if let Some(part_type) = part_type {
                        secondary.part_type = part_type;
                    }
                    if let Some(mount_point) = secondary_mount {
                        secondary.mount_point = mount_point;
                    }
                    config.partitions.push(secondary);
                }
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingPartition("storage.secondary".to_string()));
            }
            (None, None) => {}
        }

        config.validate()?;
        Ok(config)
    }
}

impl FromStr for StorageConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageConfig::parse_from_bootargs(s)
    }
}
