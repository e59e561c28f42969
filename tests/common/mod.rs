//! In-memory stand-ins for Google Sheets and the OAuth provider.
#![allow(dead_code)]

use async_trait::async_trait;
use sheet_inventory::config::{AuthSettings, Config, PollSettings, SheetSettings};
use sheet_inventory::error::{AuthError, TransientError};
use sheet_inventory::session::{AuthProvider, SignedIn};
use sheet_inventory::sheets::{RemoteTable, SheetsApi};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SHEET: &str = "inventory";

/// Every call the fake sheet receives, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Modified,
    Get(String),
    Append(String, Vec<Vec<String>>),
    Update(String, Vec<Vec<String>>),
    Clear(String),
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(self, Call::Append(..) | Call::Update(..) | Call::Clear(..))
    }
}

pub fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect()
}

/// Sheet contents plus a call log. Every write bumps the modification token.
#[derive(Default)]
pub struct FakeSheets {
    pub values: Mutex<Vec<Vec<String>>>,
    pub calls: Mutex<Vec<Call>>,
    pub version: AtomicUsize,
    pub fail_modified: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_update: AtomicBool,
    pub modified_latency: Mutex<Duration>,
    pub checks_in_flight: AtomicUsize,
    pub peak_checks: AtomicUsize,
    /// Row another client appends while the data region is cleared.
    pub append_on_clear: Mutex<Option<Vec<String>>>,
}

impl FakeSheets {
    pub fn with_values(values: Vec<Vec<String>>) -> Arc<Self> {
        let fake = FakeSheets::default();
        *fake.values.lock().unwrap() = values;
        Arc::new(fake)
    }

    pub fn values(&self) -> Vec<Vec<String>> {
        self.values.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn clear_log(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Simulate an edit made by someone else.
    pub fn touch(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn start_row(range: &str) -> usize {
        let cells = range.rsplit('!').next().unwrap_or(range);
        let first = cells.split(':').next().unwrap_or(cells);
        first.trim_start_matches(|c: char| c.is_ascii_alphabetic()).parse().unwrap_or(1)
    }
}

#[async_trait]
impl SheetsApi for FakeSheets {
    async fn modified_time(&self) -> Result<String, TransientError> {
        self.record(Call::Modified);
        let now = self.checks_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_checks.fetch_max(now, Ordering::SeqCst);

        let latency = *self.modified_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.checks_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_modified.load(Ordering::SeqCst) {
            return Err(TransientError::Status {
                status: 503,
                body: "Drive unavailable".into(),
            });
        }
        Ok(format!("v{}", self.version.load(Ordering::SeqCst)))
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, TransientError> {
        self.record(Call::Get(range.to_string()));
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(TransientError::Status {
                status: 500,
                body: "internal".into(),
            });
        }
        Ok(self.values())
    }

    async fn append_values(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), TransientError> {
        self.record(Call::Append(range.to_string(), rows.clone()));
        self.values.lock().unwrap().extend(rows);
        self.touch();
        Ok(())
    }

    async fn update_values(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), TransientError> {
        self.record(Call::Update(range.to_string(), rows.clone()));
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(TransientError::Status {
                status: 503,
                body: "write failed".into(),
            });
        }
        let start = Self::start_row(range) - 1;
        let mut values = self.values.lock().unwrap();
        for (offset, row) in rows.into_iter().enumerate() {
            let at = start + offset;
            if values.len() <= at {
                values.resize(at + 1, Vec::new());
            }
            values[at] = row;
        }
        drop(values);
        self.touch();
        Ok(())
    }

    async fn clear_values(&self, range: &str) -> Result<(), TransientError> {
        self.record(Call::Clear(range.to_string()));
        let start = Self::start_row(range) - 1;
        let mut values = self.values.lock().unwrap();
        values.truncate(start);
        if let Some(row) = self.append_on_clear.lock().unwrap().take() {
            values.push(row);
        }
        drop(values);
        self.touch();
        Ok(())
    }
}

pub fn remote_table(fake: &Arc<FakeSheets>) -> Arc<RemoteTable> {
    Arc::new(RemoteTable::new(fake.clone(), SHEET))
}

/// Accepts any grant except `"bad"`.
#[derive(Default)]
pub struct FakeAuth {
    pub signed_in: AtomicBool,
    pub sign_outs: AtomicUsize,
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn initialize(&self) -> Result<Option<SignedIn>, AuthError> {
        Ok(None)
    }

    async fn sign_in(&self, grant: &str) -> Result<SignedIn, AuthError> {
        if grant == "bad" {
            return Err(AuthError::SignIn("invalid_grant".into()));
        }
        self.signed_in.store(true, Ordering::SeqCst);
        Ok(SignedIn {
            account: Some("clerk@example.com".into()),
        })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.signed_in.store(false, Ordering::SeqCst);
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn access_token(&self) -> Option<String> {
        self.signed_in
            .load(Ordering::SeqCst)
            .then(|| "test-token".to_string())
    }

    fn sign_in_url(&self, state: &str) -> Option<String> {
        Some(format!("https://accounts.example.com/auth?state={}", state))
    }
}

pub fn test_config() -> Config {
    Config {
        auth: AuthSettings {
            api_key: "key".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            scopes: vec!["email".into()],
            discovery_docs: Vec::new(),
            redirect_url: "http://127.0.0.1:3000/auth/callback".into(),
        },
        sheet: SheetSettings {
            spreadsheet_id: "sheet".into(),
            sheet_name: SHEET.into(),
            reserved_columns: vec!["Timestamp".into(), "Email Address".into()],
        },
        poll: PollSettings::default(),
        bind_addr: "127.0.0.1:0".into(),
        http_timeout: Duration::from_secs(5),
    }
}

pub fn inventory_values() -> Vec<Vec<String>> {
    grid(&[
        &["Timestamp", "Email Address", "Style", "Qty"],
        &["t1", "e1", "A", "5"],
        &["t2", "e2", "B", "3"],
    ])
}
