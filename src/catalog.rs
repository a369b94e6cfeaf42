use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use crate::api::AccountApi;
use crate::error::{AppError, Result};
use crate::models::server::{normalize_server_name, Server};
use crate::shared::latency::LatencyProbe;

pub const PAGE_SIZE: usize = 5;

pub struct ServerCatalog<A: AccountApi + ?Sized> {
    api: Arc<A>,
    probe: LatencyProbe,
}

impl<A: AccountApi + ?Sized> ServerCatalog<A> {
    pub fn new(api: Arc<A>, probe: LatencyProbe) -> Self {
        Self { api, probe }
    }

    /// Server list with every latency resolved.
    pub async fn fetch(&self) -> Result<Vec<Server>> {
        let records = self.api.list_servers().await?;
        let ips: Vec<String> = records.iter().map(|r| r.ip.clone()).collect();
        let latencies = self.probe.measure_all(&ips).await;

        let servers: Vec<Server> = records
            .into_iter()
            .zip(latencies)
            .map(|(record, latency)| {
                let mut server = Server::from(record);
                server.latency_ms = Some(latency);
                server
            })
            .collect();
        info!(
            count = ?servers.len(),
            reachable = ?servers.iter().filter(|s| s.is_reachable()).count(), "servers_fetched");
        Ok(servers)
    }
}

/// Conjunctive filter; empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFilter {
    pub query: String,
    pub location: String,
    pub country: String,
}

impl ServerFilter {
    #[must_use]
    pub fn matches(&self, server: &Server) -> bool {
        let query = self.query.to_lowercase();
        server.name.to_lowercase().contains(&query)
            && (self.location.is_empty() || server.location == self.location)
            && (self.country.is_empty() || server.country_code() == self.country)
    }
}

#[must_use]
pub fn filter<'a>(servers: &'a [Server], filter: &ServerFilter) -> Vec<&'a Server> {
    servers.iter().filter(|s| filter.matches(s)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub total: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

#[must_use]
pub fn paginate<T: Clone>(items: &[T], page_size: usize, page: usize) -> Page<T> {
    let page_size = page_size.max(1);
    let start = page.saturating_mul(page_size).min(items.len());
    let end = start.saturating_add(page_size).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        page,
        total: items.len(),
        has_next: (page + 1).saturating_mul(page_size) < items.len(),
        has_previous: page > 0,
    }
}

/// Server list plus the filter and page the user is looking at.
#[derive(Debug, Clone, Default)]
pub struct ServerView {
    servers: Vec<Server>,
    filter: ServerFilter,
    page: usize,
}

impl ServerView {
    #[must_use]
    pub fn new(servers: Vec<Server>) -> Self {
        Self {
            servers,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    #[must_use]
    pub fn filter(&self) -> &ServerFilter {
        &self.filter
    }

    pub fn set_query(&mut self, query: &str) {
        self.filter.query = query.to_string();
        self.page = 0;
    }

    pub fn set_location(&mut self, location: &str) {
        self.filter.location = location.to_string();
        self.page = 0;
    }

    pub fn set_country(&mut self, country: &str) {
        self.filter.country = country.to_uppercase();
        self.page = 0;
    }

    #[must_use]
    pub fn filtered(&self) -> Vec<&Server> {
        filter(&self.servers, &self.filter)
    }

    #[must_use]
    pub fn current_page(&self) -> Page<&Server> {
        paginate(&self.filtered(), PAGE_SIZE, self.page)
    }

    /// Returns false when already on the last page.
    pub fn next(&mut self) -> bool {
        if !self.current_page().has_next {
            return false;
        }
        self.page += 1;
        true
    }

    pub fn previous(&mut self) -> bool {
        if self.page == 0 {
            return false;
        }
        self.page -= 1;
        true
    }

    #[must_use]
    pub fn locations(&self) -> Vec<String> {
        self.servers
            .iter()
            .map(|s| s.location.clone())
            .filter(|l| !l.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn countries(&self) -> Vec<String> {
        self.servers
            .iter()
            .map(Server::country_code)
            .filter(|c| !c.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Resolve a server by id, display name or tunnel name, ignoring case.
    pub fn find(&self, selector: &str) -> Result<&Server> {
        let selector = selector.trim();
        if let Ok(id) = selector.parse::<i64>() {
            if let Some(server) = self.servers.iter().find(|s| s.id == id) {
                return Ok(server);
            }
        }
        let wanted = selector.to_lowercase();
        let normalized = normalize_server_name(&wanted);
        self.servers
            .iter()
            .find(|s| {
                let name = s.name.to_lowercase();
                name == wanted || normalize_server_name(&name) == normalized
            })
            .ok_or_else(|| AppError::ServerNotFound(selector.to_string()))
    }
}
