//! Fake `TraktAuthClient` for unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::client::{ClientCredentials, TraktAuthClient};
use crate::error::{Error, Result};
use crate::token::{AccessToken, TokenResponse};

#[derive(Clone, Copy)]
pub(crate) enum Behavior {
    Succeed,
    RejectCredentials,
    NetworkDown,
}

/// Counts every remote call and answers according to `behavior`.
pub(crate) struct FakeAuthClient {
    behavior: Behavior,
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub revoke_calls: AtomicUsize,
    pub last_refresh_token: Mutex<Option<String>>,
}

impl FakeAuthClient {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            revoke_calls: AtomicUsize::new(0),
            last_refresh_token: Mutex::new(None),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
            + self.refresh_calls.load(Ordering::SeqCst)
            + self.revoke_calls.load(Ordering::SeqCst)
    }

    fn answer(&self, prefix: &str) -> Result<TokenResponse> {
        match self.behavior {
            Behavior::Succeed => Ok(TokenResponse {
                access_token: format!("at_{prefix}"),
                refresh_token: format!("rt_{prefix}"),
                token_type: Some("Bearer".into()),
                scope: Some("public".into()),
                expires_in: 7_776_000,
                created_at: Some(1_700_000_000),
            }),
            Behavior::RejectCredentials => {
                Err(Error::InvalidCredentials("refresh_token rejected (401)".into()))
            }
            Behavior::NetworkDown => Err(Error::Network("connection refused".into())),
        }
    }
}

impl TraktAuthClient for FakeAuthClient {
    fn exchange_code<'a>(
        &'a self,
        _code: &'a str,
        _client_id: &'a str,
        _client_secret: &'a str,
        _redirect_uri: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answer("exchanged");
        Box::pin(async move { answer })
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
        _client_id: &'a str,
        _client_secret: &'a str,
        _redirect_uri: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock().unwrap() = Some(refresh_token.to_string());
        let answer = self.answer("refreshed");
        Box::pin(async move { answer })
    }

    fn revoke<'a>(
        &'a self,
        _token: &'a str,
        _client_id: &'a str,
        _client_secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answer("revoked").map(|_| ());
        Box::pin(async move { answer })
    }
}

pub(crate) fn credentials() -> ClientCredentials {
    ClientCredentials {
        client_id: "client-id".into(),
        client_secret: String::from("client-secret").into(),
        redirect_uri: crate::constants::OOB_REDIRECT_URI.into(),
    }
}

pub(crate) fn stored_token() -> AccessToken {
    AccessToken {
        access_token: "at_stored".into(),
        refresh_token: "rt_stored".into(),
        token_type: "Bearer".into(),
        scope: "public".into(),
        created_at: 1_600_000_000,
        expires_in: 7_776_000,
    }
}
