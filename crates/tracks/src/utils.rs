use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;

const KIB_PER_MIB: f64 = 1024.0;
const MIB_PER_GIB: f64 = 1024.0;

/// Parse a memory string (like "32G", "1024M", "512") to megabytes
///
/// The result must be between 1 MiB and `u32::MAX` MiB.
pub(crate) fn parse_memory_to_mb(memory_str: &str) -> Result<u32> {
    let memory_str = memory_str.trim();

    if memory_str.is_empty() {
        return Err(eyre!("Memory string cannot be empty"));
    }

    // Try to strip unit suffix, checking case-insensitively
    let (number_str, mib_per_unit) = if let Some(num) = memory_str
        .strip_suffix('G')
        .or_else(|| memory_str.strip_suffix('g'))
    {
        (num, MIB_PER_GIB)
    } else if let Some(num) = memory_str
        .strip_suffix('M')
        .or_else(|| memory_str.strip_suffix('m'))
    {
        (num, 1.0)
    } else if let Some(num) = memory_str
        .strip_suffix('K')
        .or_else(|| memory_str.strip_suffix('k'))
    {
        (num, 1.0 / KIB_PER_MIB)
    } else {
        // No suffix, assume megabytes
        (memory_str, 1.0)
    };

    let number: f64 = number_str
        .parse()
        .with_context(|| format!("Invalid number in memory specification: {memory_str}"))?;
    if !number.is_finite() {
        return Err(eyre!("Memory size must be a finite number: {}", memory_str));
    }

    let total_mb = (number * mib_per_unit).floor();
    if total_mb < 1.0 {
        return Err(eyre!("Memory size must be at least 1M: {}", memory_str));
    }
    if total_mb > f64::from(u32::MAX) {
        return Err(eyre!("Memory size is too large: {}", memory_str));
    }

    Ok(total_mb as u32)
}
