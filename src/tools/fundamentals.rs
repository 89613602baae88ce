//! Fundamentals tools: income statements, balance sheets, cash flow statements

use super::http::ApiClient;
use super::{ToolRegistry, TypedTool};
use crate::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

pub const GET_INCOME_STATEMENTS: &str = "get_income_statements";
pub const GET_BALANCE_SHEETS: &str = "get_balance_sheets";
pub const GET_CASH_FLOW_STATEMENTS: &str = "get_cash_flow_statements";

const DEFAULT_PERIOD: &str = "annual";
const DEFAULT_LIMIT: u32 = 4;

pub fn register(registry: &mut ToolRegistry, api: ApiClient) {
    for statement in [
        Statement::Income,
        Statement::BalanceSheet,
        Statement::CashFlow,
    ] {
        registry.register(FinancialStatementTool {
            api: api.clone(),
            statement,
        });
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StatementInput {
    /// Stock ticker symbol, e.g. "AAPL"
    pub ticker: String,
    /// Reporting period: "annual", "quarterly" or "ttm" (default "annual")
    #[serde(default)]
    pub period: Option<String>,
    /// Number of periods to return (default 4)
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Statement {
    Income,
    BalanceSheet,
    CashFlow,
}

impl Statement {
    fn tool_name(self) -> &'static str {
        match self {
            Statement::Income => GET_INCOME_STATEMENTS,
            Statement::BalanceSheet => GET_BALANCE_SHEETS,
            Statement::CashFlow => GET_CASH_FLOW_STATEMENTS,
        }
    }

    fn path(self) -> &'static str {
        match self {
            Statement::Income => "/financials/income-statements",
            Statement::BalanceSheet => "/financials/balance-sheets",
            Statement::CashFlow => "/financials/cash-flow-statements",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Statement::Income => {
                "Get a company's income statements: revenue, gross profit, operating income, net income and EPS."
            }
            Statement::BalanceSheet => {
                "Get a company's balance sheets: assets, liabilities, shareholder equity, cash and debt."
            }
            Statement::CashFlow => {
                "Get a company's cash flow statements: operating, investing and financing cash flows and free cash flow."
            }
        }
    }
}

pub struct FinancialStatementTool {
    api: ApiClient,
    statement: Statement,
}

#[async_trait]
impl TypedTool for FinancialStatementTool {
    type Input = StatementInput;

    fn name(&self) -> &'static str {
        self.statement.tool_name()
    }

    fn description(&self) -> &'static str {
        self.statement.description()
    }

    async fn call(&self, input: StatementInput) -> Result<Value> {
        let query = [
            ("ticker", input.ticker.to_uppercase()),
            (
                "period",
                input.period.unwrap_or_else(|| DEFAULT_PERIOD.to_string()),
            ),
            ("limit", input.limit.unwrap_or(DEFAULT_LIMIT).to_string()),
        ];
        self.api
            .get_json(self.statement.tool_name(), self.statement.path(), &query)
            .await
    }
}
