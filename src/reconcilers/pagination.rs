// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Paged list calls against the Kubernetes API.
//!
//! A control-plane namespace can hold thousands of DNS entries, so lists are
//! fetched in pages of [`KUBE_LIST_PAGE_SIZE`] items.

use crate::constants::KUBE_LIST_PAGE_SIZE;
use anyhow::{Context as _, Result};
use kube::{api::ListParams, Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Parameters of the first page.
#[must_use]
pub fn first_page(mut list_params: ListParams) -> ListParams {
    list_params.limit = Some(KUBE_LIST_PAGE_SIZE);
    list_params.continue_token = None;
    list_params
}

/// Parameters of the page after a response carrying `continue_token`, or
/// `None` when the list is complete.
#[must_use]
pub fn next_page(list_params: &ListParams, continue_token: Option<String>) -> Option<ListParams> {
    let token = continue_token.filter(|t| !t.is_empty())?;
    let mut next = list_params.clone();
    next.continue_token = Some(token);
    Some(next)
}

/// List all resources matching `list_params`, one page at a time.
///
/// # Example
///
/// ```no_run
/// use kube::{Api, Client, api::ListParams};
/// use shoot_dns_service::crd::DNSEntry;
/// use shoot_dns_service::reconcilers::pagination::list_all_paginated;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = Client::try_default().await?;
/// let api: Api<DNSEntry> = Api::namespaced(client, "shoot--dev--app");
///
/// let entries = list_all_paginated(&api, ListParams::default()).await?;
/// println!("Found {} entries", entries.len());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if a list call fails.
pub async fn list_all_paginated<K>(api: &Api<K>, list_params: ListParams) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let mut params = first_page(list_params);
    let mut all_items = Vec::new();
    let mut page_count = 0;

    loop {
        page_count += 1;
        let result = api
            .list(&params)
            .await
            .with_context(|| format!("failed to list {} (page {page_count})", K::kind(&())))?;

        all_items.extend(result.items);
        debug!(
            kind = %K::kind(&()),
            page = page_count,
            total_items = all_items.len(),
            "Fetched page"
        );

        match next_page(&params, result.metadata.continue_) {
            Some(next) => params = next,
            None => break,
        }
    }

    Ok(all_items)
}

#[cfg(test)]
#[path = "pagination_tests.rs"]
mod pagination_tests;
