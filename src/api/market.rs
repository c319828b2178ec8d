use chrono::Utc;

use super::client::{BitgetClient, Params};
use super::responses::{LongShortEntry, OpenInterestData};
use crate::error::ApiError;
use crate::models::{OpenInterestSample, RatioSample};

const OPEN_INTEREST_PATH: &str = "/api/v2/mix/market/open-interest";
const LONG_SHORT_PATH: &str = "/api/v2/mix/market/account-long-short";

impl BitgetClient {
    /// Current open interest for `symbol`, stamped with the local clock.
    pub async fn get_open_interest(
        &self,
        symbol: &str,
        product_type: &str,
    ) -> Result<OpenInterestSample, ApiError> {
        let params = Params::query(&[("symbol", symbol), ("productType", product_type)]);
        let data: OpenInterestData = self.get(OPEN_INTEREST_PATH, &params).await?;

        let entry = data
            .open_interest_list
            .first()
            .ok_or_else(|| ApiError::Decode("empty openInterestList".to_string()))?;

        tracing::debug!(symbol, size = entry.size, "Fetched open interest");

        Ok(OpenInterestSample {
            timestamp: Utc::now().timestamp_millis(),
            value: entry.size,
        })
    }

    /// Latest long/short account ratio for `symbol`.
    pub async fn get_position_ratio(
        &self,
        symbol: &str,
        period: &str,
    ) -> Result<RatioSample, ApiError> {
        let params = Params::query(&[("symbol", symbol), ("period", period)]);
        let rows: Vec<LongShortEntry> = self.get(LONG_SHORT_PATH, &params).await?;

        let latest = rows
            .last()
            .ok_or_else(|| ApiError::Decode("empty long/short ratio list".to_string()))?;

        tracing::debug!(
            symbol,
            long_short = latest.long_short_account_ratio,
            "Fetched position ratio"
        );

        Ok(RatioSample {
            timestamp: Utc::now().timestamp_millis(),
            long_ratio: latest.long_account_ratio,
            short_ratio: latest.short_account_ratio,
            long_short_ratio: latest.long_short_account_ratio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server) -> BitgetClient {
        BitgetClient::new(&ExchangeConfig {
            base_url: server.url(),
            api_key: "key".to_string(),
            secret_key: "secret".to_string(),
            passphrase: "pass".to_string(),
            retry_initial_delay_ms: 1,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_get_open_interest() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", OPEN_INTEREST_PATH)
            .match_query(Matcher::Exact(
                "productType=USDT-FUTURES&symbol=BTCUSDT".to_string(),
            ))
            .with_status(200)
            .with_body(
                r#"{"code":"00000","msg":"success","data":{"openInterestList":[{"symbol":"BTCUSDT","size":"34278.06"}],"ts":"1"}}"#,
            )
            .create_async()
            .await;

        let sample = client_for(&server)
            .get_open_interest("BTCUSDT", "USDT-FUTURES")
            .await
            .unwrap();

        assert_eq!(sample.value, 34278.06);
        assert!(sample.timestamp > 0);
    }

    #[tokio::test]
    async fn test_get_position_ratio_takes_latest_row() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", LONG_SHORT_PATH)
            .match_query(Matcher::Exact("period=1m&symbol=BTCUSDT".to_string()))
            .with_status(200)
            .with_body(
                r#"{"code":"00000","msg":"success","data":[
                    {"longAccountRatio":"0.60","shortAccountRatio":"0.40","longShortAccountRatio":"1.5"},
                    {"longAccountRatio":"0.62","shortAccountRatio":"0.38","longShortAccountRatio":"1.63"}
                ]}"#,
            )
            .create_async()
            .await;

        let sample = client_for(&server)
            .get_position_ratio("BTCUSDT", "1m")
            .await
            .unwrap();

        assert_eq!(sample.long_ratio, 0.62);
        assert_eq!(sample.short_ratio, 0.38);
        assert_eq!(sample.long_short_ratio, 1.63);
    }

    #[tokio::test]
    async fn test_empty_ratio_list_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", LONG_SHORT_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":"00000","msg":"success","data":[]}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .get_position_ratio("BTCUSDT", "1m")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Decode(_)));
    }
}
