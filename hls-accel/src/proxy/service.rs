//! Playlist handling shared by the proxy routes and the task API.

use std::sync::Arc;

use futures::future::BoxFuture;
use hls_rewrite::{
    ParsedPlaylist, best_variant_url, fingerprint, parse_playlist, rewrite_master, rewrite_variant,
};
use tracing::{debug, info, warn};

use super::upstream::UpstreamClient;
use crate::task::{CreationDecision, StartOutcome, TaskManager, TaskPlan, TriggerOrigin};
use crate::utils::url::parse_source_url;
use crate::{Error, Result};

/// Master playlists may point at further master playlists; follow at most
/// this many levels when picking a variant.
const MAX_MASTER_DEPTH: usize = 4;

pub struct ProxyService {
    upstream: UpstreamClient,
    manager: Arc<TaskManager>,
    /// Base used for tasks started without a player request.
    default_proxy_base: String,
}

impl ProxyService {
    pub fn new(
        upstream: UpstreamClient,
        manager: Arc<TaskManager>,
        default_proxy_base: impl Into<String>,
    ) -> Self {
        Self {
            upstream,
            manager,
            default_proxy_base: default_proxy_base.into(),
        }
    }

    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    pub fn default_proxy_base(&self) -> &str {
        &self.default_proxy_base
    }

    /// Produce the proxied body for the playlist at `origin_url`.
    ///
    /// A stored body wins over the network. Otherwise the playlist is fetched
    /// and rewritten; for a variant playlist the task is created and its files
    /// dispatched in the background, and the body is returned without waiting.
    pub async fn playlist(&self, origin_url: &str, proxy_base: &str) -> Result<String> {
        let source = parse_source_url(origin_url)?;
        let task_id = fingerprint(origin_url);

        match self.manager.repository().get_proxied_content(&task_id).await {
            Ok(Some(content)) => {
                debug!(task_id = %task_id, "Serving stored playlist");
                return Ok(content);
            }
            Ok(None) => {}
            Err(e) => warn!(task_id = %task_id, error = %e, "Failed to read stored playlist"),
        }

        let body = self.upstream.fetch_playlist(&source).await?;

        match parse_playlist(&body)? {
            ParsedPlaylist::Master(master) => {
                debug!(url = %origin_url, variants = master.variants.len(), "Rewriting master playlist");
                Ok(rewrite_master(master, proxy_base, &source)?)
            }
            ParsedPlaylist::Media(media) => {
                let rewrite = rewrite_variant(media, proxy_base, &task_id, &source)?;
                let content = rewrite.content.clone();

                let decision = match self.manager.decide(&task_id, TriggerOrigin::Player).await {
                    Ok(decision) => decision,
                    Err(e) => {
                        // create_task rejects duplicates on its own
                        warn!(task_id = %task_id, error = %e, "Failed to check task; attempting creation");
                        CreationDecision::Create
                    }
                };

                if decision != CreationDecision::Create {
                    debug!(task_id = %task_id, ?decision, "Not starting task from player request");
                } else {
                    let plan = TaskPlan::from_rewrite(&task_id, origin_url, rewrite);
                    self.manager.spawn_start(plan, TriggerOrigin::Player);
                }

                Ok(content)
            }
        }
    }

    /// Validate an operator-submitted URL and start its task in the background.
    ///
    /// Returns the fingerprint of `raw_url`. A URL whose task is downloading or
    /// completed is refused with [`Error::AlreadyExists`].
    pub async fn add_task(self: &Arc<Self>, raw_url: &str) -> Result<String> {
        parse_source_url(raw_url)?;
        let task_id = fingerprint(raw_url);

        if let CreationDecision::Skip(status) =
            self.manager.decide(&task_id, TriggerOrigin::Api).await?
        {
            return Err(Error::AlreadyExists {
                entity_type: format!("Task ({status})"),
                id: task_id,
            });
        }

        let this = Arc::clone(self);
        let url = raw_url.to_string();
        self.manager.spawn_background(async move {
            match this.start_from_url(&url, MAX_MASTER_DEPTH).await {
                Ok(task_id) => debug!(task_id = %task_id, url = %url, "API task start finished"),
                Err(e) => warn!(url = %url, error = %e, "Failed to start task from API"),
            }
        });

        Ok(task_id)
    }

    /// Fetch `raw_url` and start a task for it. A master playlist is replaced by
    /// its highest-bandwidth variant. Returns the id of the task that was
    /// started.
    pub fn start_from_url<'a>(&'a self, raw_url: &'a str, depth: usize) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let source = parse_source_url(raw_url)?;
            let task_id = fingerprint(raw_url);

            if let CreationDecision::Skip(status) =
                self.manager.decide(&task_id, TriggerOrigin::Api).await?
            {
                return Err(Error::AlreadyExists {
                    entity_type: format!("Task ({status})"),
                    id: task_id,
                });
            }

            let body = self.upstream.fetch_playlist(&source).await?;

            match parse_playlist(&body)? {
                ParsedPlaylist::Master(master) => {
                    if depth == 0 {
                        return Err(Error::validation(format!(
                            "Master playlists nested too deeply at {raw_url}"
                        )));
                    }
                    let best = best_variant_url(&master, &source).ok_or_else(|| {
                        Error::validation(format!("Master playlist {raw_url} has no variants"))
                    })?;
                    info!(master = %raw_url, variant = %best, "Selected highest-bandwidth variant");
                    self.start_from_url(&best, depth - 1).await
                }
                ParsedPlaylist::Media(media) => {
                    let rewrite =
                        rewrite_variant(media, &self.default_proxy_base, &task_id, &source)?;
                    let plan = TaskPlan::from_rewrite(&task_id, raw_url, rewrite);

                    match self.manager.start_task(plan, TriggerOrigin::Api).await? {
                        StartOutcome::Started(_) | StartOutcome::AlreadyExists => Ok(task_id),
                        StartOutcome::Skipped(status) => Err(Error::AlreadyExists {
                            entity_type: format!("Task ({status})"),
                            id: task_id,
                        }),
                    }
                }
            }
        })
    }
}

/// Proxy base as seen by the requesting client (`http://{host}/proxy`).
pub fn proxy_base_for_host(host: Option<&str>, fallback: &str) -> String {
    match host.filter(|h| !h.is_empty()) {
        Some(host) => format!("http://{host}/proxy"),
        None => fallback.to_string(),
    }
}
