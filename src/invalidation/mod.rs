//! File-change invalidation and the hot-update channel.
//!
//! When a source file changes, the corresponding node is marked
//! [`NodeState::Stale`] and the change propagates upward through the
//! dependents of the node. The walk stops at any dependent that declared it
//! accepts hot updates for the changed URL; those boundaries are reported in
//! an [`UpdateEvent::Update`]. A change that escapes past every boundary up
//! to an entry point (or to a node nothing accepts) degrades to
//! [`UpdateEvent::Reload`].
//!
//! Filesystem watchers are noisy, so raw change notifications go through a
//! debounce window: changes arriving within the window are coalesced and
//! deduplicated before invalidation runs. Events fan out on a
//! `tokio::sync::broadcast` channel; a server layer typically forwards them
//! to connected clients as server-sent events.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use url::Url;

use crate::graph::{NodeState, UrlGraph};

/// What a client should do about a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpdateEvent {
    /// The change escaped every hot-update boundary; reload the page.
    Reload {
        /// The changed URL.
        url: String,
    },
    /// Every propagation path ended at an accepting dependent; swap the
    /// module in place.
    Update {
        /// The changed URL.
        url: String,
        /// The boundaries that accepted the update, sorted.
        #[serde(rename = "acceptedBy")]
        accepted_by: Vec<String>,
    },
}

impl UpdateEvent {
    /// The changed URL the event is about.
    pub fn url(&self) -> &str {
        match self {
            UpdateEvent::Reload { url } | UpdateEvent::Update { url, .. } => url,
        }
    }
}

/// Marks nodes stale on change and publishes [`UpdateEvent`]s.
pub struct Invalidator {
    graph: Arc<UrlGraph>,
    events: broadcast::Sender<UpdateEvent>,
    changes: mpsc::UnboundedSender<Url>,
    debounce_task: JoinHandle<()>,
}

impl Invalidator {
    /// An invalidator over `graph` coalescing changes within `debounce`.
    pub fn new(graph: Arc<UrlGraph>, debounce: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        let (changes, rx) = mpsc::unbounded_channel();
        let debounce_task = tokio::spawn(Self::debounce_loop(
            graph.clone(),
            events.clone(),
            rx,
            debounce,
        ));
        Self {
            graph,
            events,
            changes,
            debounce_task,
        }
    }

    /// Subscribe to the hot-update channel.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.events.subscribe()
    }

    /// Report a raw file-change notification. The change is debounced and
    /// invalidated on the background task.
    pub fn notify_changed(&self, url: &Url) {
        // Send only fails when the debounce task is gone, i.e. on shutdown.
        let _ = self.changes.send(url.clone());
    }

    async fn debounce_loop(
        graph: Arc<UrlGraph>,
        events: broadcast::Sender<UpdateEvent>,
        mut rx: mpsc::UnboundedReceiver<Url>,
        debounce: Duration,
    ) {
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            let deadline = tokio::time::Instant::now() + debounce;
            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(url)) => batch.push(url),
                    Ok(None) | Err(_) => break,
                }
            }
            let mut seen = HashSet::new();
            for url in batch {
                if !seen.insert(url.clone()) {
                    continue;
                }
                if let Some(event) = invalidate(&graph, &url) {
                    tracing::debug!(target: "invalidation", "{url} changed: {event:?}");
                    // No subscribers is fine; staleness already took effect.
                    let _ = events.send(event);
                }
            }
        }
    }

    /// Invalidate immediately, bypassing the debounce window, and publish
    /// the resulting event.
    pub fn invalidate_now(&self, url: &Url) -> Option<UpdateEvent> {
        let event = invalidate(&self.graph, url)?;
        let _ = self.events.send(event.clone());
        Some(event)
    }
}

impl Drop for Invalidator {
    fn drop(&mut self) {
        self.debounce_task.abort();
    }
}

/// Mark `url` stale, propagate staleness to its unaccepting dependents, and
/// compute the client-facing event. Returns `None` for URLs the graph does
/// not know.
pub fn invalidate(graph: &UrlGraph, url: &Url) -> Option<UpdateEvent> {
    let info = graph.info(url)?;
    graph.set_state(url, NodeState::Stale);

    // A module accepting its own updates is a boundary all by itself.
    if info.accepted_hot_deps.contains(url) {
        return Some(UpdateEvent::Update {
            url: url.to_string(),
            accepted_by: vec![url.to_string()],
        });
    }

    let mut boundaries: HashSet<Url> = HashSet::new();
    let mut stale: HashSet<Url> = HashSet::from([url.clone()]);
    let mut escaped = graph.is_entry_point(url) || graph.dependents_of(url).is_empty();
    let mut queue = VecDeque::from([url.clone()]);
    while let Some(current) = queue.pop_front() {
        for dependent in graph.dependents_of(&current) {
            let accepts = graph
                .info(&dependent)
                .is_some_and(|info| info.accepted_hot_deps.contains(&current));
            if accepts {
                // The boundary absorbs this path only. It stays eligible
                // for the walk through a dependency it does not accept, so
                // boundary hits are tracked apart from staleness.
                boundaries.insert(dependent);
                continue;
            }
            if !stale.insert(dependent.clone()) {
                continue;
            }
            graph.set_state(&dependent, NodeState::Stale);
            if graph.is_entry_point(&dependent) || graph.dependents_of(&dependent).is_empty() {
                escaped = true;
            }
            queue.push_back(dependent);
        }
    }

    // A boundary that itself went stale through another path can no longer
    // absorb the update.
    let mut accepted_by: Vec<String> = boundaries
        .iter()
        .filter(|boundary| !stale.contains(boundary))
        .map(ToString::to_string)
        .collect();
    if escaped || accepted_by.is_empty() {
        Some(UpdateEvent::Reload {
            url: url.to_string(),
        })
    } else {
        accepted_by.sort();
        Some(UpdateEvent::Update {
            url: url.to_string(),
            accepted_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse(&format!("file:///root/{path}")).unwrap()
    }

    /// entry.html -> app.js -> util.js
    fn chain() -> Arc<UrlGraph> {
        let graph = Arc::new(UrlGraph::new());
        graph.mark_entry_point(&url("entry.html"));
        graph.register_dependency(&url("entry.html"), &url("app.js"));
        graph.register_dependency(&url("app.js"), &url("util.js"));
        for u in [url("entry.html"), url("app.js"), url("util.js")] {
            graph.update_info(&u, |info| info.state = NodeState::Ready);
        }
        graph
    }

    #[test]
    fn change_without_boundary_reloads() {
        let graph = chain();
        let event = invalidate(&graph, &url("util.js")).unwrap();
        assert_eq!(
            event,
            UpdateEvent::Reload {
                url: url("util.js").to_string()
            }
        );
        // Staleness propagated all the way to the entry.
        assert_eq!(graph.state_of(&url("util.js")), Some(NodeState::Stale));
        assert_eq!(graph.state_of(&url("app.js")), Some(NodeState::Stale));
        assert_eq!(graph.state_of(&url("entry.html")), Some(NodeState::Stale));
    }

    #[test]
    fn accepting_dependent_stops_the_walk() {
        let graph = chain();
        graph.update_info(&url("app.js"), |info| {
            info.accepted_hot_deps.insert(url("util.js"));
        });

        let event = invalidate(&graph, &url("util.js")).unwrap();
        assert_eq!(
            event,
            UpdateEvent::Update {
                url: url("util.js").to_string(),
                accepted_by: vec![url("app.js").to_string()],
            }
        );
        // The boundary and everything above it stay valid.
        assert_eq!(graph.state_of(&url("util.js")), Some(NodeState::Stale));
        assert_eq!(graph.state_of(&url("app.js")), Some(NodeState::Ready));
        assert_eq!(graph.state_of(&url("entry.html")), Some(NodeState::Ready));
    }

    #[test]
    fn self_accepting_module_updates_in_place() {
        let graph = chain();
        graph.update_info(&url("util.js"), |info| {
            info.accepted_hot_deps.insert(url("util.js"));
        });

        let event = invalidate(&graph, &url("util.js")).unwrap();
        assert_eq!(
            event,
            UpdateEvent::Update {
                url: url("util.js").to_string(),
                accepted_by: vec![url("util.js").to_string()],
            }
        );
        assert_eq!(graph.state_of(&url("app.js")), Some(NodeState::Ready));
    }

    #[test]
    fn boundary_goes_stale_through_a_path_it_does_not_accept() {
        // entry -> d -> {x, b}, b -> x; d accepts x but not b. Changing x
        // must reach d again via b and escalate all the way to the entry.
        let graph = Arc::new(UrlGraph::new());
        graph.mark_entry_point(&url("entry.html"));
        graph.register_dependency(&url("entry.html"), &url("d.js"));
        graph.register_dependency(&url("d.js"), &url("x.js"));
        graph.register_dependency(&url("d.js"), &url("b.js"));
        graph.register_dependency(&url("b.js"), &url("x.js"));
        for name in ["entry.html", "d.js", "b.js", "x.js"] {
            graph.update_info(&url(name), |info| info.state = NodeState::Ready);
        }
        graph.update_info(&url("d.js"), |info| {
            info.accepted_hot_deps.insert(url("x.js"));
        });

        let event = invalidate(&graph, &url("x.js")).unwrap();
        assert!(matches!(event, UpdateEvent::Reload { .. }));
        assert_eq!(graph.state_of(&url("d.js")), Some(NodeState::Stale));
        assert_eq!(graph.state_of(&url("entry.html")), Some(NodeState::Stale));
    }

    #[test]
    fn one_escaping_path_degrades_to_reload() {
        // Two importers of util.js; only one accepts.
        let graph = chain();
        graph.register_dependency(&url("entry.html"), &url("other.js"));
        graph.register_dependency(&url("other.js"), &url("util.js"));
        graph.update_info(&url("app.js"), |info| {
            info.accepted_hot_deps.insert(url("util.js"));
        });

        let event = invalidate(&graph, &url("util.js")).unwrap();
        assert!(matches!(event, UpdateEvent::Reload { .. }));
    }

    #[test]
    fn changing_an_entry_point_reloads() {
        let graph = chain();
        let event = invalidate(&graph, &url("entry.html")).unwrap();
        assert!(matches!(event, UpdateEvent::Reload { .. }));
    }

    #[test]
    fn unknown_urls_are_ignored() {
        let graph = chain();
        assert!(invalidate(&graph, &url("ghost.js")).is_none());
    }

    #[test]
    fn events_serialize_with_the_wire_names() {
        let event = UpdateEvent::Update {
            url: "file:///root/util.js".to_string(),
            accepted_by: vec!["file:///root/app.js".to_string()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["acceptedBy"][0], "file:///root/app.js");

        let reload = UpdateEvent::Reload {
            url: "file:///root/a.js".to_string(),
        };
        assert_eq!(serde_json::to_value(&reload).unwrap()["type"], "reload");
    }

    #[tokio::test]
    async fn debounce_coalesces_bursts() {
        let graph = chain();
        let invalidator = Invalidator::new(graph, Duration::from_millis(20));
        let mut events = invalidator.subscribe();

        for _ in 0..5 {
            invalidator.notify_changed(&url("util.js"));
        }

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("debounced event")
            .unwrap();
        assert_eq!(event.url(), url("util.js").as_str());

        // The burst produced exactly one event.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
