//! Hop-by-hop link establishment for multi-hop transports

use async_trait::async_trait;
use tracing::debug;

use crate::models::{Hop, Route};

use super::error::{SessionError, SessionResult};

/// Starts and stops the per-hop links of a route
#[async_trait]
pub(crate) trait HopLauncher: Send + Sync {
    /// Live link to one hop
    type Link: Send + Sync;

    /// Brings up hop `index`, relayed through `via` unless it is the first
    async fn start(
        &self,
        index: usize,
        hop: &Hop,
        via: Option<&Self::Link>,
    ) -> Result<Self::Link, String>;

    /// Tears a link down
    async fn stop(&self, link: &mut Self::Link);
}

/// Establishes every hop of `route` in order
///
/// Hop `n` is started through the link of hop `n - 1`. When a hop fails,
/// the links already up are stopped, nearest to the target first, and the
/// error names the failing hop.
pub(crate) async fn establish<L: HopLauncher>(
    launcher: &L,
    route: &Route,
) -> SessionResult<Vec<L::Link>> {
    let mut links: Vec<L::Link> = Vec::with_capacity(route.len());
    for (index, hop) in route.hops().iter().enumerate() {
        debug!(hop = index, host = %hop.host, role = %hop.role, "Establishing hop");
        match launcher.start(index, hop, links.last()).await {
            Ok(link) => links.push(link),
            Err(cause) => {
                debug!(hop = index, established = links.len(), "Hop failed, tearing down");
                teardown(launcher, &mut links).await;
                return Err(SessionError::ConnectFailed {
                    hop: index,
                    host: hop.host.clone(),
                    cause,
                });
            }
        }
    }
    Ok(links)
}

/// Stops `links` from the last one back to the first
pub(crate) async fn teardown<L: HopLauncher>(launcher: &L, links: &mut Vec<L::Link>) {
    while let Some(mut link) = links.pop() {
        launcher.stop(&mut link).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::models::Credentials;

    /// Launcher whose links are the host names, logging every call
    #[derive(Default)]
    struct RecordingLauncher {
        fail_at: Option<usize>,
        log: Mutex<Vec<String>>,
    }

    impl RecordingLauncher {
        fn failing_at(index: usize) -> Self {
            Self {
                fail_at: Some(index),
                ..Self::default()
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HopLauncher for RecordingLauncher {
        type Link = String;

        async fn start(
            &self,
            index: usize,
            hop: &Hop,
            via: Option<&String>,
        ) -> Result<String, String> {
            let via = via.map_or_else(|| "direct".to_string(), |v| format!("via {v}"));
            self.log
                .lock()
                .unwrap()
                .push(format!("start {index} {} {via}", hop.host));
            if self.fail_at == Some(index) {
                return Err("Permission denied".to_string());
            }
            Ok(hop.host.clone())
        }

        async fn stop(&self, link: &mut String) {
            self.log.lock().unwrap().push(format!("stop {link}"));
        }
    }

    fn relayed() -> Route {
        Route::relayed(
            "sut",
            Hop::jump("bastion", Credentials::user("ops")),
            Hop::target("sut-1", Credentials::user("root")),
        )
    }

    #[tokio::test]
    async fn test_jump_first_then_target_through_it() {
        let launcher = RecordingLauncher::default();
        let links = establish(&launcher, &relayed()).await.unwrap();

        assert_eq!(links, ["bastion", "sut-1"]);
        assert_eq!(
            launcher.log(),
            ["start 0 bastion direct", "start 1 sut-1 via bastion"]
        );
    }

    #[tokio::test]
    async fn test_target_failure_tears_down_jump() {
        let launcher = RecordingLauncher::failing_at(1);
        let err = establish(&launcher, &relayed()).await.unwrap_err();

        assert_eq!(
            err,
            SessionError::ConnectFailed {
                hop: 1,
                host: "sut-1".into(),
                cause: "Permission denied".into(),
            }
        );
        assert_eq!(
            launcher.log(),
            [
                "start 0 bastion direct",
                "start 1 sut-1 via bastion",
                "stop bastion"
            ]
        );
    }

    #[tokio::test]
    async fn test_jump_failure_never_reaches_target() {
        let launcher = RecordingLauncher::failing_at(0);
        let err = establish(&launcher, &relayed()).await.unwrap_err();

        assert!(matches!(err, SessionError::ConnectFailed { hop: 0, ref host, .. } if host == "bastion"));
        assert_eq!(launcher.log(), ["start 0 bastion direct"]);
    }

    #[tokio::test]
    async fn test_teardown_runs_nearest_hop_first() {
        let route = Route::new(
            "deep",
            vec![
                Hop::jump("edge", Credentials::default()),
                Hop::jump("core", Credentials::default()),
                Hop::target("leaf", Credentials::default()),
            ],
        )
        .unwrap();
        let launcher = RecordingLauncher::failing_at(2);
        let err = establish(&launcher, &route).await.unwrap_err();

        assert!(matches!(err, SessionError::ConnectFailed { hop: 2, .. }));
        assert_eq!(&launcher.log()[3..], ["stop core", "stop edge"]);
    }

    #[tokio::test]
    async fn test_local_route_has_no_links() {
        let launcher = RecordingLauncher::failing_at(0);
        let links = establish(&launcher, &Route::local()).await.unwrap();
        assert!(links.is_empty());
        assert!(launcher.log().is_empty());
    }
}
