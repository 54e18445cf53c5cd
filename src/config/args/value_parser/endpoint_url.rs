use url::Url;

const INVALID_SCHEME: &str = "endpoint URL must start with http:// or https://";

pub fn check_endpoint_url(value: &str) -> Result<String, String> {
    let url = Url::parse(value).map_err(|e| e.to_string())?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(INVALID_SCHEME.to_string());
    }

    Ok(value.to_string())
}
