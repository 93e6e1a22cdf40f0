//! Playground services
//!
//! Small responders used by the `nats-gather` binary to exercise the
//! request/reply, scatter-gather and nested gather paths end to end:
//!
//! - `finance/convert/usd`: one responder per currency converts a USD
//!   amount; a requester gathers every conversion
//! - `finance/aggregate/usd`: aggregators gather conversions themselves
//!   and reply with the whole list
//! - `math/log`: natural logarithm, single reply

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::Client;
use crate::codec::Codec;
use crate::registry::SubscriptionHandle;
use crate::types::{GatherError, Result};

/// Subject for USD conversion requests
pub const CONVERT_SUBJECT: &str = "finance/convert/usd";

/// Subject for aggregated USD conversion requests
pub const AGGREGATE_SUBJECT: &str = "finance/aggregate/usd";

/// Subject for natural logarithm requests
pub const LOG_SUBJECT: &str = "math/log";

/// Supported target currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Gbp,
    Cad,
    Aud,
    Nzd,
    Jpy,
    Cny,
    Inr,
    Chf,
    Rub,
}

impl Currency {
    /// Units of this currency per USD
    pub fn rate(self) -> f64 {
        match self {
            Self::Eur => 0.88,
            Self::Gbp => 0.77,
            Self::Cad => 1.32,
            Self::Aud => 1.43,
            Self::Nzd => 1.53,
            Self::Jpy => 111.12,
            Self::Cny => 6.92,
            Self::Inr => 71.37,
            Self::Chf => 0.99,
            Self::Rub => 63.92,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Eur => "EUR",
            Self::Gbp => "GBP",
            Self::Cad => "CAD",
            Self::Aud => "AUD",
            Self::Nzd => "NZD",
            Self::Jpy => "JPY",
            Self::Cny => "CNY",
            Self::Inr => "INR",
            Self::Chf => "CHF",
            Self::Rub => "RUB",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One conversion result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Converted {
    pub currency: Currency,
    pub usd: i64,
    pub amount: f64,
}

pub fn convert(usd: i64, to: Currency) -> Converted {
    Converted {
        currency: to,
        usd,
        amount: usd as f64 * to.rate(),
    }
}

/// ln(x), refusing inputs with no finite answer
pub fn natural_log(x: f64) -> std::result::Result<f64, String> {
    if !x.is_finite() || x <= 0.0 {
        return Err(format!("logarithm undefined for {}", x));
    }
    Ok(x.ln())
}

/// Answer conversion requests for one currency
pub async fn serve_conversions<C: Codec>(client: &Client<C>, to: Currency) -> Result<SubscriptionHandle> {
    client
        .register_handler(CONVERT_SUBJECT, move |usd: i64| async move {
            debug!("Converting {} USD to {}", usd, to);
            Ok::<_, GatherError>(convert(usd, to))
        })
        .await
}

/// Answer logarithm requests
pub async fn serve_logarithms<C: Codec>(client: &Client<C>) -> Result<SubscriptionHandle> {
    client
        .register_handler(LOG_SUBJECT, |x: f64| async move { natural_log(x) })
        .await
}

/// Answer aggregate requests by gathering conversions for `window` and
/// replying with everything collected
pub async fn serve_aggregate<C: Codec>(client: &Client<C>, window: Duration) -> Result<SubscriptionHandle> {
    let gatherer = client.clone();
    client
        .register_handler(AGGREGATE_SUBJECT, move |usd: i64| {
            let gatherer = gatherer.clone();
            async move {
                let (conversions, error) = gatherer
                    .gather::<_, Converted>(CONVERT_SUBJECT, &usd, window)
                    .await
                    .into_parts();
                if let Some(e) = error {
                    warn!(
                        "Aggregating {} USD stopped early after {} conversions: {}",
                        usd,
                        conversions.len(),
                        e
                    );
                }
                Ok::<_, GatherError>(conversions)
            }
        })
        .await
}
