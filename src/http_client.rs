use std::time::Duration;

use reqwest::Client;

use crate::errors::AppError;

const USER_AGENT: &str = concat!("skyfurl/", env!("CARGO_PKG_VERSION"));

pub fn build_http_client() -> Result<Client, AppError> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(15))
        .build()?;

    Ok(client)
}
