//! Trading accounts: balances keyed by asset, positions keyed by symbol.
//!
//! Admission checks are deliberately lax (only BUY LIMIT notional is checked
//! against the quote balance), but every fill settles cash, so balances track
//! executions. Unchecked paths may drive a balance negative; the simulator
//! accepts that.

use std::collections::HashMap;

use rust_decimal::Decimal;

use super::orders::{Fill, OrderSide, Position};

#[derive(Debug)]
pub struct Account {
    pub session_id: String,
    balances: HashMap<String, Decimal>,
    positions: HashMap<String, Position>,
}

impl Account {
    pub fn new(session_id: impl Into<String>, balances: HashMap<String, Decimal>) -> Self {
        Self {
            session_id: session_id.into(),
            balances,
            positions: HashMap::new(),
        }
    }

    pub fn balance(&self, asset: &str) -> Decimal {
        self.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn balances(&self) -> &HashMap<String, Decimal> {
        &self.balances
    }

    pub fn set_balance(&mut self, asset: &str, amount: Decimal) {
        self.balances.insert(asset.to_string(), amount);
    }

    pub fn adjust_balance(&mut self, asset: &str, delta: Decimal) -> Decimal {
        let entry = self.balances.entry(asset.to_string()).or_insert(Decimal::ZERO);
        *entry += delta;
        *entry
    }

    pub fn has_sufficient_balance(&self, asset: &str, required: Decimal) -> bool {
        self.balance(asset) >= required
    }

    pub fn position(&mut self, symbol: &str) -> &mut Position {
        self.positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::new(symbol))
    }

    pub fn position_ref(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    /// Settle a fill: move cash and fold the execution into the position.
    /// `mark_price` refreshes the unrealized P&L snapshot.
    pub fn apply_fill(&mut self, fill: &Fill, mark_price: Decimal) {
        let (base, quote) = split_symbol(&fill.symbol);
        let notional = fill.price * fill.quantity;
        match fill.side {
            OrderSide::Buy => {
                self.adjust_balance(&quote, -notional);
                self.adjust_balance(&base, fill.quantity);
            }
            OrderSide::Sell => {
                self.adjust_balance(&quote, notional);
                self.adjust_balance(&base, -fill.quantity);
            }
        }
        let position = self.position(&fill.symbol);
        position.update_on_fill(fill);
        position.unrealized_at(mark_price);
    }

    /// Cash plus realized and marked-to-market unrealized P&L.
    pub fn total_equity(&mut self, marks: &HashMap<String, Decimal>) -> Decimal {
        let mut equity: Decimal = self.balances.values().copied().sum();
        for (symbol, position) in &mut self.positions {
            if let Some(mark) = marks.get(symbol) {
                equity += position.unrealized_at(*mark);
            }
            equity += position.realized_pnl;
        }
        equity
    }
}

/// `"BTC/USD"` → `("BTC", "USD")`. A symbol without a separator quotes
/// against itself, which only happens with malformed config.
pub fn split_symbol(symbol: &str) -> (String, String) {
    match symbol.split_once('/') {
        Some((base, quote)) => (base.to_string(), quote.to_string()),
        None => (symbol.to_string(), symbol.to_string()),
    }
}

#[derive(Debug)]
pub struct AccountManager {
    accounts: HashMap<String, Account>,
    default_balance: HashMap<String, Decimal>,
}

impl AccountManager {
    pub fn new(default_balance: HashMap<String, Decimal>) -> Self {
        Self {
            accounts: HashMap::new(),
            default_balance,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<&Account> {
        self.accounts.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Account> {
        self.accounts.get_mut(session_id)
    }

    /// Accounts are created lazily with the configured default balances.
    pub fn get_or_create(&mut self, session_id: &str) -> &mut Account {
        if !self.accounts.contains_key(session_id) {
            let account = Account::new(session_id, self.default_balance.clone());
            self.accounts.insert(session_id.to_string(), account);
        }
        self.accounts.get_mut(session_id).unwrap()
    }

    pub fn remove(&mut self, session_id: &str) -> bool {
        self.accounts.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
