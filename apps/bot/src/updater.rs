use std::{sync::Arc, time::Duration};

use chrono::Utc;
use chrono_tz::Tz;
use flp::{PriceClient, Quote};
use tokio::{task::JoinSet, time::MissedTickBehavior};
use tracing::{error, info, info_span, instrument, warn};
use tracing_futures::Instrument;

use crate::roster::GuildRoster;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No usable price; nicknames were left alone.
    Skipped,
    Broadcast {
        nickname: String,
        updated: usize,
        failed: usize,
    },
}

pub struct NicknameUpdater {
    price_client: Arc<PriceClient>,
    roster: Arc<dyn GuildRoster>,
    time_zone: Tz,
}

impl NicknameUpdater {
    pub fn new(price_client: Arc<PriceClient>, roster: Arc<dyn GuildRoster>, time_zone: Tz) -> Self {
        Self {
            price_client,
            roster,
            time_zone,
        }
    }

    /// Never fails: any problem is logged and reported as `None`.
    #[instrument(
        name = "fetch_price",
        skip(self),
        fields(symbol = %self.price_client.symbol())
    )]
    pub async fn fetch_display_price(&self) -> Option<Quote> {
        let today = Utc::now().with_timezone(&self.time_zone).date_naive();

        match self.price_client.latest_quote(today).await {
            Ok(Some(quote)) => {
                info!(price = %quote, "fetched latest price");
                Some(quote)
            }
            Ok(None) => {
                warn!(%today, "no observation for symbol in lookback window");
                None
            }
            Err(e) => {
                warn!(error = ?e, "price fetch failed");
                None
            }
        }
    }

    /// Sets the nickname in every guild concurrently, one task per guild.
    /// Completion order is unspecified and a failure in one guild does not
    /// affect the others.
    pub async fn broadcast(&self, quote: Option<Quote>) -> CycleOutcome {
        let Some(quote) = quote else {
            info!("skipping nickname update, price unavailable");
            return CycleOutcome::Skipped;
        };

        let nickname = quote.nickname();
        let guilds = self.roster.guilds().await;
        info!(guilds = guilds.len(), %nickname, "updating nicknames");

        let mut tasks = JoinSet::new();
        for guild in guilds {
            let roster = Arc::clone(&self.roster);
            let nickname = nickname.clone();
            let span = info_span!("guild_nickname", guild = %guild.name, guild_id = %guild.id);

            tasks.spawn(
                async move {
                    let res = roster.set_own_nickname(&guild, &nickname).await;
                    (guild, res)
                }
                .instrument(span),
            );
        }

        let mut updated: usize = 0;
        let mut failed: usize = 0;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((guild, Ok(()))) => {
                    updated += 1;
                    info!(guild = %guild.name, "nickname updated");
                }
                Ok((guild, Err(e))) => {
                    failed += 1;
                    warn!(guild = %guild.name, error = ?e, "nickname update failed");
                }
                Err(e) => {
                    failed += 1;
                    error!(error = ?e, "nickname task did not finish");
                }
            }
        }

        info!(updated, failed, "nickname cycle complete");

        CycleOutcome::Broadcast {
            nickname,
            updated,
            failed,
        }
    }

    #[instrument(name = "nickname_cycle", skip(self))]
    pub async fn run_cycle(&self) -> CycleOutcome {
        let quote = self.fetch_display_price().await;
        self.broadcast(quote).await
    }

    /// First cycle runs immediately. Cycles never overlap: a tick that comes
    /// due while one is still running is dropped.
    pub async fn run(&self, period: Duration) {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            self.run_cycle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use anyhow::{Result, bail};
    use flp::RawPrice;
    use serenity::all::GuildId;
    use serenity::async_trait;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::roster::GuildEntry;

    #[derive(Default)]
    struct FakeRoster {
        guilds: Vec<GuildEntry>,
        failing: HashSet<GuildId>,
        listings: AtomicUsize,
        calls: Mutex<Vec<(GuildId, String)>>,
    }

    impl FakeRoster {
        fn with_guilds(ids: &[u64]) -> Self {
            Self {
                guilds: ids
                    .iter()
                    .map(|&id| GuildEntry {
                        id: GuildId::new(id),
                        name: format!("guild-{id}"),
                    })
                    .collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(GuildId, String)> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort();
            calls
        }
    }

    #[async_trait]
    impl GuildRoster for FakeRoster {
        async fn guilds(&self) -> Vec<GuildEntry> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            self.guilds.clone()
        }

        async fn set_own_nickname(&self, guild: &GuildEntry, nickname: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((guild.id, nickname.to_string()));

            if self.failing.contains(&guild.id) {
                bail!("Missing Permissions");
            }
            Ok(())
        }
    }

    // Serves the same JSON body to every request; counts requests.
    async fn serve_json(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);

                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    loop {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        request.extend_from_slice(&buf[..n]);
                        if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    socket.write_all(response.as_bytes()).await.ok();
                    socket.shutdown().await.ok();
                });
            }
        });

        (format!("http://{addr}/flp-stats/by-date-range"), hits)
    }

    async fn unreachable_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/")
    }

    fn quote(raw: &str) -> Quote {
        Quote::from_raw(&RawPrice::Text(raw.to_string())).unwrap()
    }

    fn updater(url: String, roster: Arc<FakeRoster>) -> NicknameUpdater {
        let price_client = Arc::new(PriceClient::new(url, "FLP.1").unwrap());
        NicknameUpdater::new(price_client, roster, chrono_tz::UTC)
    }

    #[tokio::test]
    async fn every_guild_gets_the_latest_price() {
        let (url, _) = serve_json(
            r#"[
                {"symbol": "FLP.1", "timestamp": 100, "price": "500000"},
                {"symbol": "FLP.1", "timestamp": 200, "price": "999999"}
            ]"#,
        )
        .await;
        let roster = Arc::new(FakeRoster::with_guilds(&[1, 2, 3]));

        let outcome = updater(url, Arc::clone(&roster)).run_cycle().await;

        assert_eq!(
            outcome,
            CycleOutcome::Broadcast {
                nickname: "$1.0000".to_string(),
                updated: 3,
                failed: 0,
            }
        );
        assert_eq!(
            roster.calls(),
            vec![
                (GuildId::new(1), "$1.0000".to_string()),
                (GuildId::new(2), "$1.0000".to_string()),
                (GuildId::new(3), "$1.0000".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_symbol_skips_without_touching_guilds() {
        let (url, _) =
            serve_json(r#"[{"symbol": "FLP.2", "timestamp": 1, "price": "1000000"}]"#).await;
        let roster = Arc::new(FakeRoster::with_guilds(&[1, 2]));

        let outcome = updater(url, Arc::clone(&roster)).run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Skipped);
        assert!(roster.calls().is_empty());
        assert_eq!(roster.listings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_error_is_swallowed() {
        let roster = Arc::new(FakeRoster::with_guilds(&[1]));
        let updater = updater(unreachable_url().await, Arc::clone(&roster));

        assert_eq!(updater.fetch_display_price().await, None);
        assert_eq!(updater.run_cycle().await, CycleOutcome::Skipped);
        assert!(roster.calls().is_empty());
    }

    #[tokio::test]
    async fn one_failing_guild_does_not_stop_the_rest() {
        let mut roster = FakeRoster::with_guilds(&[1, 2, 3, 4]);
        roster.failing.insert(GuildId::new(2));
        let roster = Arc::new(roster);
        let updater = updater(unreachable_url().await, Arc::clone(&roster));

        let outcome = updater.broadcast(Some(quote("1234567"))).await;

        assert_eq!(
            outcome,
            CycleOutcome::Broadcast {
                nickname: "$1.2346".to_string(),
                updated: 3,
                failed: 1,
            }
        );
        assert_eq!(roster.calls().len(), 4);
    }

    #[tokio::test]
    async fn no_guilds_is_an_empty_broadcast() {
        let roster = Arc::new(FakeRoster::default());
        let updater = updater(unreachable_url().await, Arc::clone(&roster));

        let outcome = updater.broadcast(Some(quote("2000000"))).await;

        assert_eq!(
            outcome,
            CycleOutcome::Broadcast {
                nickname: "$2.0000".to_string(),
                updated: 0,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn run_repeats_on_the_period() {
        let (url, hits) =
            serve_json(r#"[{"symbol": "FLP.1", "timestamp": 1, "price": "1000000"}]"#).await;
        let roster = Arc::new(FakeRoster::with_guilds(&[7]));
        let updater = Arc::new(updater(url, Arc::clone(&roster)));

        let runner = Arc::clone(&updater);
        let handle = tokio::spawn(async move { runner.run(Duration::from_millis(100)).await });

        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.abort();

        assert!(hits.load(Ordering::SeqCst) >= 2);
        assert!(roster.calls().len() >= 2);
        assert!(roster.calls().iter().all(|(_, nick)| nick == "$1.0000"));
    }
}
