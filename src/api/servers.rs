use tracing::info;

use crate::api::http::{parse_api_json, ApiClient};
use crate::error::Result;
use crate::models::server::{ServerRecord, ServersResponse};

/// Fetch the full server list, in service order.
pub async fn fetch_server_list(client: &ApiClient) -> Result<Vec<ServerRecord>> {
    info!("fetching_server_list");
    let resp = client.get("/api/servers").send().await?;
    let list: ServersResponse = parse_api_json(resp, "server list").await?;
    info!( count = ?list.servers.len(), "server_list_fetched");
    Ok(list.servers)
}
