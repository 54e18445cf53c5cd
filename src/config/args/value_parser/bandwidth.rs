use crate::transfer::bandwidth::BandwidthLimit;

pub fn check_bandwidth_limit(value: &str) -> Result<String, String> {
    BandwidthLimit::parse(value).map_err(|e| e.to_string())?;

    Ok(value.to_string())
}
