use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, Utc};
use log::{error, info, warn};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::chain::ChainAdapter;
use crate::db::{self, SqlitePool};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
const OUTGOING_RETENTION: chrono::Duration = chrono::Duration::hours(24);
const DRAIN_WINDOW: chrono::Duration = chrono::Duration::hours(1);
const ALERT_DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);
const ALERT_RING_CAPACITY: usize = 100;
const BALANCE_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Thresholds in SOL, configurable per deployment.
#[derive(Debug, Clone)]
pub struct TreasuryThresholds {
    pub balance_warning_sol: f64,
    pub balance_critical_sol: f64,
    pub single_tx_warning_sol: f64,
    pub hourly_drain_critical_sol: f64,
}

impl Default for TreasuryThresholds {
    fn default() -> Self {
        Self {
            balance_warning_sol: 1.0,
            balance_critical_sol: 0.1,
            single_tx_warning_sol: 0.5,
            hourly_drain_critical_sol: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TreasuryAlert {
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub amount_lamports: Option<u64>,
    #[serde(serialize_with = "serialize_naive")]
    pub raised_at: NaiveDateTime,
}

fn serialize_naive<S: serde::Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.to_string())
}

struct MonitorState {
    outgoing: VecDeque<(NaiveDateTime, u64)>,
    alerts: VecDeque<TreasuryAlert>,
    last_alert_at: HashMap<String, Instant>,
}

/// Balance and drain monitor for the treasury account.
///
/// Keeps a 24 h sliding record of outgoing transactions, raises deduplicated
/// alerts on threshold crossings, optionally pushes them to a webhook, and
/// retains the last hundred alerts for the admin surface.
pub struct TreasuryMonitor {
    chain: Arc<ChainAdapter>,
    db_pool: SqlitePool,
    treasury_address: String,
    thresholds: TreasuryThresholds,
    webhook_url: Option<String>,
    client: Client,
    state: Mutex<MonitorState>,
}

impl TreasuryMonitor {
    pub fn new(
        chain: Arc<ChainAdapter>,
        db_pool: SqlitePool,
        treasury_address: impl Into<String>,
        thresholds: TreasuryThresholds,
        webhook_url: Option<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .user_agent("turnstile-treasury/1.0")
            .build()
            .expect("Failed to build HTTP client");

        Self {
            chain,
            db_pool,
            treasury_address: treasury_address.into(),
            thresholds,
            webhook_url,
            client,
            state: Mutex::new(MonitorState {
                outgoing: VecDeque::new(),
                alerts: VecDeque::new(),
                last_alert_at: HashMap::new(),
            }),
        }
    }

    pub fn recent_alerts(&self) -> Vec<TreasuryAlert> {
        self.state.lock().expect("monitor mutex poisoned").alerts.iter().cloned().collect()
    }

    /// Records one outgoing transfer and evaluates the single-tx and drain
    /// thresholds.
    pub async fn record_outgoing(&self, lamports: u64) {
        let now = Utc::now().naive_utc();
        let drained_last_hour = {
            let mut state = self.state.lock().expect("monitor mutex poisoned");
            state.outgoing.push_back((now, lamports));
            while let Some((t, _)) = state.outgoing.front() {
                if now - *t > OUTGOING_RETENTION {
                    state.outgoing.pop_front();
                } else {
                    break;
                }
            }
            state
                .outgoing
                .iter()
                .filter(|(t, _)| now - *t <= DRAIN_WINDOW)
                .map(|(_, l)| l)
                .sum::<u64>()
        };

        let single_warn = sol_to_lamports(self.thresholds.single_tx_warning_sol);
        if lamports >= single_warn {
            self.raise(
                "LARGE_TRANSFER",
                "warning",
                format!("single transfer of {:.3} SOL", lamports_to_sol(lamports)),
                Some(lamports),
            )
            .await;
        }

        let drain_critical = sol_to_lamports(self.thresholds.hourly_drain_critical_sol);
        if drained_last_hour >= drain_critical {
            self.raise(
                "RAPID_DRAIN",
                "critical",
                format!("{:.3} SOL out in the last hour", lamports_to_sol(drained_last_hour)),
                Some(drained_last_hour),
            )
            .await;
        }
    }

    /// Reads the treasury balance and evaluates the balance thresholds.
    pub async fn check_balance(&self) {
        let balance = match self.chain.get_balance(&self.treasury_address).await {
            Ok(b) => b,
            Err(e) => {
                warn!(error:% = e; "Treasury balance check failed");
                return;
            },
        };

        if balance <= sol_to_lamports(self.thresholds.balance_critical_sol) {
            self.raise(
                "BALANCE_CRITICAL",
                "critical",
                format!("treasury balance at {:.3} SOL", lamports_to_sol(balance)),
                Some(balance),
            )
            .await;
        } else if balance <= sol_to_lamports(self.thresholds.balance_warning_sol) {
            self.raise(
                "BALANCE_LOW",
                "warning",
                format!("treasury balance at {:.3} SOL", lamports_to_sol(balance)),
                Some(balance),
            )
            .await;
        }
    }

    /// Raises an alert unless the same type fired within the dedup window.
    async fn raise(&self, alert_type: &str, severity: &str, message: String, amount_lamports: Option<u64>) {
        let alert = {
            let mut state = self.state.lock().expect("monitor mutex poisoned");

            if let Some(last) = state.last_alert_at.get(alert_type) {
                if last.elapsed() < ALERT_DEDUP_WINDOW {
                    return;
                }
            }
            state.last_alert_at.insert(alert_type.to_string(), Instant::now());

            let alert = TreasuryAlert {
                alert_type: alert_type.to_string(),
                severity: severity.to_string(),
                message,
                amount_lamports,
                raised_at: Utc::now().naive_utc(),
            };
            state.alerts.push_back(alert.clone());
            while state.alerts.len() > ALERT_RING_CAPACITY {
                state.alerts.pop_front();
            }
            alert
        };

        warn!(
            target: "audit",
            alert_type = alert_type,
            severity = severity,
            message = &*alert.message;
            "Treasury alert"
        );

        // Persist for the record; failure is logged, the in-memory ring is
        // authoritative for the admin surface.
        {
            let pool = self.db_pool.clone();
            let alert = alert.clone();
            let persisted = tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                db::insert_treasury_alert(
                    &conn,
                    &alert.alert_type,
                    &alert.severity,
                    &alert.message,
                    alert.amount_lamports.map(|l| l as i64),
                )
            })
            .await;
            if let Ok(Err(e)) = persisted {
                error!(error:% = e; "Failed to persist treasury alert");
            }
        }

        if let Some(url) = &self.webhook_url {
            if let Err(e) = self.client.post(url).json(&alert).send().await {
                warn!(error:% = e; "Treasury alert webhook dispatch failed");
            }
        }
    }

    /// Background balance watcher in the shared worker shape.
    pub fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Treasury monitor started.");
            let mut interval = tokio::time::interval(BALANCE_CHECK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.check_balance().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Treasury monitor received shutdown signal.");
                        break;
                    }
                }
            }
        })
    }
}

fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64) as u64
}

fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}
