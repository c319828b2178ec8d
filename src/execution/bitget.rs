use super::executor::{OpenOrder, OrderExecutor};
use crate::api::responses::{AccountEntry, OrderAck, PositionEntry};
use crate::api::{BitgetClient, Params};
use crate::config::ExchangeConfig;
use crate::error::{ApiError, Error, Result};
use crate::models::{Position, Side};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const ACCOUNTS_PATH: &str = "/api/v2/mix/account/accounts";
const SINGLE_POSITION_PATH: &str = "/api/v2/mix/position/single-position";
const SET_LEVERAGE_PATH: &str = "/api/v2/mix/account/set-leverage";
const PLACE_ORDER_PATH: &str = "/api/v2/mix/order/place-order";
const CLOSE_POSITIONS_PATH: &str = "/api/v2/mix/order/close-positions";
const CANCEL_ALL_PATH: &str = "/api/v2/mix/order/cancel-all-orders";

/// "No order to cancel"
const NOTHING_TO_CANCEL: &str = "22001";

/// Live futures execution over the signed REST client.
pub struct BitgetExecutor {
    client: Arc<BitgetClient>,
    product_type: String,
    margin_coin: String,
    margin_mode: String,
    price_decimals: usize,
}

impl BitgetExecutor {
    pub fn new(client: Arc<BitgetClient>, config: &ExchangeConfig) -> Self {
        Self {
            client,
            product_type: config.product_type.clone(),
            margin_coin: config.margin_coin.clone(),
            margin_mode: config.margin_mode.clone(),
            price_decimals: config.price_decimals as usize,
        }
    }

    fn format_price(&self, price: f64) -> String {
        format!("{:.*}", self.price_decimals, price)
    }

    async fn set_leverage(&self, symbol: &str, side: Side, leverage: u32) -> Result<()> {
        let body = json!({
            "symbol": symbol,
            "productType": self.product_type,
            "marginCoin": self.margin_coin,
            "leverage": leverage.to_string(),
            "holdSide": side.as_str(),
        });
        let _: serde_json::Value = self
            .client
            .post(SET_LEVERAGE_PATH, body)
            .await
            .map_err(order_error)?;
        tracing::info!(symbol, leverage, side = %side, "Leverage set");
        Ok(())
    }

    /// Request body for a new opening order.
    pub fn order_body(&self, order: &OpenOrder, client_oid: &str) -> serde_json::Value {
        let side = match order.side {
            Side::Long => "buy",
            Side::Short => "sell",
        };
        let mut body = json!({
            "symbol": order.symbol,
            "productType": self.product_type,
            "marginMode": self.margin_mode,
            "marginCoin": self.margin_coin,
            "size": format!("{:.3}", order.size),
            "side": side,
            "tradeSide": "open",
            "orderType": order.order_type.as_str(),
            "force": "gtc",
            "clientOid": client_oid,
            "presetStopLossPrice": self.format_price(order.stop_loss_price),
        });
        if let Some(map) = body.as_object_mut() {
            if order.order_type == crate::models::OrderType::Limit {
                map.insert("price".to_string(), json!(self.format_price(order.price)));
            }
            if order.take_profit_price > 0.0 {
                map.insert(
                    "presetStopSurplusPrice".to_string(),
                    json!(self.format_price(order.take_profit_price)),
                );
            }
        }
        body
    }
}

/// Exchange-level refusals become order rejections. Transport failures stay API errors.
fn order_error(e: ApiError) -> Error {
    match e {
        ApiError::Exchange { code, msg } => Error::Order(format!("{}: {}", code, msg)),
        ApiError::Rejected { status, body } => Error::Order(format!("HTTP {}: {}", status, body)),
        other => Error::Api(other),
    }
}

fn parse_hold_side(raw: &str) -> Option<Side> {
    match raw {
        "long" => Some(Side::Long),
        "short" => Some(Side::Short),
        _ => None,
    }
}

#[async_trait]
impl OrderExecutor for BitgetExecutor {
    async fn get_account_balance(&self) -> Result<f64> {
        let params = Params::query(&[("productType", self.product_type.as_str())]);
        let accounts: Vec<AccountEntry> = self.client.get(ACCOUNTS_PATH, &params).await?;

        let balance = accounts
            .iter()
            .find(|a| a.margin_coin.eq_ignore_ascii_case(&self.margin_coin))
            .map(|a| a.available)
            .unwrap_or(0.0);
        tracing::debug!(balance, coin = %self.margin_coin, "Fetched account balance");
        Ok(balance)
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        let params = Params::query(&[
            ("symbol", symbol),
            ("productType", self.product_type.as_str()),
            ("marginCoin", self.margin_coin.as_str()),
        ]);
        let rows: Vec<PositionEntry> = self.client.get(SINGLE_POSITION_PATH, &params).await?;

        let position = rows
            .into_iter()
            .filter(|row| row.total > 0.0)
            .find_map(|row| {
                let side = parse_hold_side(&row.hold_side)?;
                let mut position = Position {
                    symbol: row.symbol,
                    side,
                    size: row.total,
                    entry_price: row.open_price_avg,
                    leverage: row.leverage.round().max(1.0) as u32,
                    unrealized_pnl_pct: 0.0,
                };
                if let Some(mark) = row.mark_price {
                    position.mark(mark);
                }
                Some(position)
            });
        Ok(position)
    }

    async fn open_position(&self, order: &OpenOrder) -> Result<()> {
        if order.size <= 0.0 {
            return Err(Error::Order(format!("non-positive size {}", order.size)));
        }

        self.set_leverage(&order.symbol, order.side, order.leverage)
            .await?;

        let client_oid = Uuid::new_v4().to_string();
        let body = self.order_body(order, &client_oid);
        let ack: OrderAck = self
            .client
            .post(PLACE_ORDER_PATH, body)
            .await
            .map_err(order_error)?;

        tracing::info!(
            symbol = %order.symbol,
            side = %order.side,
            size = order.size,
            price = order.price,
            stop_loss = order.stop_loss_price,
            order_id = ?ack.order_id,
            client_oid = %client_oid,
            "Order placed"
        );
        Ok(())
    }

    async fn close_position_at_market(&self, position: &Position) -> Result<()> {
        let body = json!({
            "symbol": position.symbol,
            "productType": self.product_type,
            "holdSide": position.side.as_str(),
        });
        let _: serde_json::Value = self
            .client
            .post(CLOSE_POSITIONS_PATH, body)
            .await
            .map_err(order_error)?;

        tracing::info!(symbol = %position.symbol, side = %position.side, size = position.size, "Position closed");
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        let body = json!({
            "symbol": symbol,
            "productType": self.product_type,
            "marginCoin": self.margin_coin,
        });
        match self
            .client
            .post::<serde_json::Value>(CANCEL_ALL_PATH, body)
            .await
        {
            Ok(_) => {
                tracing::info!(symbol, "Cancelled open orders");
                Ok(())
            }
            Err(ApiError::Exchange { code, .. }) if code == NOTHING_TO_CANCEL => Ok(()),
            Err(e) => Err(order_error(e)),
        }
    }
}
