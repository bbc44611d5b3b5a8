use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use stocky_core::calendar::{DateParseError, DayKey};
use stocky_core::domain::record::{PlanSuggestion, RecordPatch};
use stocky_core::forecast::{self, ForecastError, ForecastMethod, DEFAULT_PERIODS};
use stocky_core::protocol::ProtocolState;
use stocky_core::routing::SpecialistKind;
use stocky_db::{DemoDataset, RecordStore, StorageError};

use crate::specialists;

pub const GET_DAILY_DATA: &str = "get_daily_data";
pub const UPDATE_PRODUCTION_PLAN: &str = "update_production_plan";
pub const UPDATE_DEMAND: &str = "update_demand";
pub const GET_PRODUCTION_SUMMARY: &str = "get_production_summary";
pub const GET_DEMAND_SUMMARY: &str = "get_demand_summary";
pub const GET_INVENTORY_SUMMARY: &str = "get_inventory_summary";
pub const GET_STOCKOUTS: &str = "get_stockouts";
pub const PROPOSE_PRODUCTION_PLAN: &str = "propose_production_plan_for_stockouts";
pub const GENERATE_FUTURE_DATA: &str = "generate_future_data";
pub const INCREASE_ALL_DEMAND: &str = "increase_all_demand";
pub const CLEAR_ALL_FORECAST: &str = "clear_all_forecast";
pub const CALCULATE_DEMAND_FORECAST: &str = "calculate_demand_forecast";
pub const DELETE_ALL_DATA: &str = "delete_all_data";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEffect {
    ReadOnly,
    Mutating,
}

/// One catalog entry: the schema shown to the model and the effect class the
/// gate enforces.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub effect: ToolEffect,
    pub parameters: Value,
}

fn no_parameters() -> Value {
    json!({"type": "object", "properties": {}})
}

fn date_property(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

/// The full tool catalog. Specialist bindings are a subset of this list; see
/// `specialists`.
pub fn catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: GET_DAILY_DATA,
            description: "Fetch one day's record, or every stored day when no date is given.",
            effect: ToolEffect::ReadOnly,
            parameters: json!({
                "type": "object",
                "properties": {
                    "date": date_property("Calendar day to fetch, YYYY-MM-DD preferred."),
                },
            }),
        },
        ToolSpec {
            name: UPDATE_PRODUCTION_PLAN,
            description: "Set the production plan for a day. Inventory is recomputed from that day forward.",
            effect: ToolEffect::Mutating,
            parameters: json!({
                "type": "object",
                "properties": {
                    "date": date_property("Day to update, YYYY-MM-DD preferred."),
                    "plan": {"type": "number", "description": "Planned production quantity."},
                },
                "required": ["date", "plan"],
            }),
        },
        ToolSpec {
            name: UPDATE_DEMAND,
            description: "Set the demand for a day. Inventory is recomputed from that day forward.",
            effect: ToolEffect::Mutating,
            parameters: json!({
                "type": "object",
                "properties": {
                    "date": date_property("Day to update, YYYY-MM-DD preferred."),
                    "demand": {"type": "number", "description": "Demand quantity."},
                },
                "required": ["date", "demand"],
            }),
        },
        ToolSpec {
            name: GET_PRODUCTION_SUMMARY,
            description: "Average, maximum, minimum and total of production over all stored days.",
            effect: ToolEffect::ReadOnly,
            parameters: no_parameters(),
        },
        ToolSpec {
            name: GET_DEMAND_SUMMARY,
            description: "Average, maximum, minimum and total of demand over all stored days.",
            effect: ToolEffect::ReadOnly,
            parameters: no_parameters(),
        },
        ToolSpec {
            name: GET_INVENTORY_SUMMARY,
            description: "Average, maximum and minimum of the running inventory balance.",
            effect: ToolEffect::ReadOnly,
            parameters: no_parameters(),
        },
        ToolSpec {
            name: GET_STOCKOUTS,
            description: "List the days whose inventory balance is zero or negative.",
            effect: ToolEffect::ReadOnly,
            parameters: no_parameters(),
        },
        ToolSpec {
            name: PROPOSE_PRODUCTION_PLAN,
            description: "Suggest a production plan covering each stockout day's demand. Advisory only; nothing is written.",
            effect: ToolEffect::ReadOnly,
            parameters: no_parameters(),
        },
        ToolSpec {
            name: GENERATE_FUTURE_DATA,
            description: "Insert consecutive days of randomized demand and production records.",
            effect: ToolEffect::Mutating,
            parameters: json!({
                "type": "object",
                "properties": {
                    "start_date": date_property("First day to generate, YYYY-MM-DD preferred."),
                    "days": {"type": "integer", "description": "How many consecutive days to generate."},
                },
                "required": ["start_date", "days"],
            }),
        },
        ToolSpec {
            name: INCREASE_ALL_DEMAND,
            description: "Add an offset to every stored day's demand and rebalance inventory.",
            effect: ToolEffect::Mutating,
            parameters: json!({
                "type": "object",
                "properties": {
                    "offset": {"type": "number", "description": "Amount added to each day's demand."},
                },
                "required": ["offset"],
            }),
        },
        ToolSpec {
            name: CLEAR_ALL_FORECAST,
            description: "Clear the forecast value on every stored day. Demand, production and inventory are untouched.",
            effect: ToolEffect::Mutating,
            parameters: no_parameters(),
        },
        ToolSpec {
            name: CALCULATE_DEMAND_FORECAST,
            description: "Project future demand from history and store it in the forecast field.",
            effect: ToolEffect::Mutating,
            parameters: json!({
                "type": "object",
                "properties": {
                    "method": {
                        "type": "string",
                        "enum": ["moving_average", "exponential_smoothing"],
                        "description": "Forecast method; defaults to moving_average.",
                    },
                    "periods": {"type": "integer", "description": "Days to project; defaults to 7."},
                    "start_date": date_property("First forecast day; defaults to the day after the last stored day."),
                },
            }),
        },
        ToolSpec {
            name: DELETE_ALL_DATA,
            description: "Delete every stored day. Irreversible.",
            effect: ToolEffect::Mutating,
            parameters: no_parameters(),
        },
    ]
}

pub fn find_spec(name: &str) -> Option<ToolSpec> {
    catalog().into_iter().find(|spec| spec.name == name)
}

pub fn is_mutating(name: &str) -> bool {
    find_spec(name).map(|spec| spec.effect == ToolEffect::Mutating).unwrap_or(false)
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    Unknown(String),
    #[error("tool `{tool}` is outside the {specialist} toolset")]
    NotPermitted { tool: String, specialist: SpecialistKind },
    #[error("mutating tool `{0}` needs a confirmed execution grant")]
    ConfirmationRequired(String),
    #[error("invalid arguments for `{tool}`: {detail}")]
    InvalidArguments { tool: String, detail: String },
    #[error(transparent)]
    Date(#[from] DateParseError),
    #[error(transparent)]
    Forecast(#[from] ForecastError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Executes catalog tools against the record store.
///
/// The layer enforces two things itself: a tool must be in the calling
/// specialist's binding, and a mutating tool is only accepted while the
/// specialist's protocol state is `Executing`. It never asks for confirmation;
/// obtaining one is the specialist's job.
pub struct ToolLayer {
    records: Arc<dyn RecordStore>,
}

impl ToolLayer {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    pub async fn invoke(
        &self,
        specialist: SpecialistKind,
        grant: ProtocolState,
        tool: &str,
        arguments: &Value,
    ) -> Result<Value, ToolError> {
        let spec = find_spec(tool).ok_or_else(|| ToolError::Unknown(tool.to_string()))?;
        if !specialists::toolset(specialist).iter().any(|bound| *bound == tool) {
            return Err(ToolError::NotPermitted { tool: tool.to_string(), specialist });
        }
        if spec.effect == ToolEffect::Mutating && !grant.permits_mutation() {
            return Err(ToolError::ConfirmationRequired(tool.to_string()));
        }
        if !arguments.is_object() && !arguments.is_null() {
            return Err(ToolError::InvalidArguments {
                tool: tool.to_string(),
                detail: "arguments must be a JSON object".to_string(),
            });
        }

        match spec.name {
            GET_DAILY_DATA => self.get_daily_data(arguments).await,
            UPDATE_PRODUCTION_PLAN => self.update_production_plan(arguments).await,
            UPDATE_DEMAND => self.update_demand(arguments).await,
            GET_PRODUCTION_SUMMARY => {
                let summary = self.records.production_summary().await?;
                Ok(json!({"summary": summary}))
            }
            GET_DEMAND_SUMMARY => {
                let summary = self.records.demand_summary().await?;
                Ok(json!({"summary": summary}))
            }
            GET_INVENTORY_SUMMARY => {
                let summary = self.records.inventory_summary().await?;
                Ok(json!({"summary": summary}))
            }
            GET_STOCKOUTS => {
                let stockouts = self.records.stockout_days().await?;
                Ok(json!({"count": stockouts.len(), "stockouts": stockouts}))
            }
            PROPOSE_PRODUCTION_PLAN => self.propose_production_plan().await,
            GENERATE_FUTURE_DATA => self.generate_future_data(arguments).await,
            INCREASE_ALL_DEMAND => self.increase_all_demand(arguments).await,
            CLEAR_ALL_FORECAST => {
                let cleared = self.records.clear_forecasts().await?;
                Ok(json!({"days_cleared": cleared}))
            }
            CALCULATE_DEMAND_FORECAST => self.calculate_demand_forecast(arguments).await,
            DELETE_ALL_DATA => {
                let deleted = self.records.delete_all().await?;
                Ok(json!({"days_deleted": deleted}))
            }
            _ => Err(ToolError::Unknown(tool.to_string())),
        }
    }

    async fn get_daily_data(&self, arguments: &Value) -> Result<Value, ToolError> {
        match optional_str(GET_DAILY_DATA, arguments, "date")? {
            Some(raw) => {
                let day = DayKey::normalize(raw)?;
                let record = self.records.fetch_day(day).await?;
                Ok(json!({"date": day, "record": record}))
            }
            None => {
                let records = self.records.fetch_all().await?;
                Ok(json!({"count": records.len(), "records": records}))
            }
        }
    }

    async fn update_production_plan(&self, arguments: &Value) -> Result<Value, ToolError> {
        let day = DayKey::normalize(required_str(UPDATE_PRODUCTION_PLAN, arguments, "date")?)?;
        let plan = required_f64(UPDATE_PRODUCTION_PLAN, arguments, "plan")?;
        let stored = self.records.apply_patch(day, RecordPatch::production(plan)).await?;
        Ok(json!({"record": stored}))
    }

    async fn update_demand(&self, arguments: &Value) -> Result<Value, ToolError> {
        let day = DayKey::normalize(required_str(UPDATE_DEMAND, arguments, "date")?)?;
        let demand = required_f64(UPDATE_DEMAND, arguments, "demand")?;
        let stored = self.records.apply_patch(day, RecordPatch::demand(demand)).await?;
        Ok(json!({"record": stored}))
    }

    async fn propose_production_plan(&self) -> Result<Value, ToolError> {
        let stockouts = self.records.stockout_days().await?;
        let suggestions: Vec<PlanSuggestion> = stockouts
            .iter()
            .map(|record| PlanSuggestion {
                date: record.date,
                demand: record.demand,
                current_production: record.production,
                proposed_production: record.demand,
            })
            .collect();
        Ok(json!({"count": suggestions.len(), "suggestions": suggestions}))
    }

    async fn generate_future_data(&self, arguments: &Value) -> Result<Value, ToolError> {
        let start = DayKey::normalize(required_str(GENERATE_FUTURE_DATA, arguments, "start_date")?)?;
        let days = required_u64(GENERATE_FUTURE_DATA, arguments, "days")?;
        if days == 0 {
            return Err(invalid(GENERATE_FUTURE_DATA, "days must be at least 1"));
        }
        let days =
            u32::try_from(days).map_err(|_| invalid(GENERATE_FUTURE_DATA, "days is too large"))?;
        let seeded = DemoDataset::seed(self.records.as_ref(), start, days).await?;
        Ok(json!({
            "days_generated": seeded.days_seeded,
            "first_day": seeded.first_day,
            "last_day": seeded.last_day,
        }))
    }

    async fn increase_all_demand(&self, arguments: &Value) -> Result<Value, ToolError> {
        let offset = required_f64(INCREASE_ALL_DEMAND, arguments, "offset")?;
        let changed = self.records.shift_demand(offset).await?;
        Ok(json!({"days_changed": changed, "offset": offset}))
    }

    async fn calculate_demand_forecast(&self, arguments: &Value) -> Result<Value, ToolError> {
        let method = match optional_str(CALCULATE_DEMAND_FORECAST, arguments, "method")? {
            Some(raw) => ForecastMethod::parse(raw)?,
            None => ForecastMethod::default(),
        };
        let periods = match optional_u64(CALCULATE_DEMAND_FORECAST, arguments, "periods")? {
            Some(0) => return Err(invalid(CALCULATE_DEMAND_FORECAST, "periods must be at least 1")),
            Some(periods) => periods as usize,
            None => DEFAULT_PERIODS,
        };
        let start_override = match optional_str(CALCULATE_DEMAND_FORECAST, arguments, "start_date")?
        {
            Some(raw) => Some(DayKey::normalize(raw)?),
            None => None,
        };

        let records = self.records.fetch_all().await?;
        let history: Vec<f64> = records.iter().map(|record| record.demand).collect();
        let values = forecast::project(&history, method, periods)?;
        let start = match start_override {
            Some(day) => day,
            None => match records.last() {
                Some(last) => last.date.next(),
                None => {
                    return Err(invalid(
                        CALCULATE_DEMAND_FORECAST,
                        "start_date is required when no days are stored",
                    ));
                }
            },
        };

        let mut day = start;
        let pairs: Vec<(DayKey, f64)> = values
            .iter()
            .map(|&value| {
                let current = day;
                day = day.next();
                (current, value)
            })
            .collect();
        let written = self.records.write_forecasts(&pairs).await?;

        Ok(json!({
            "method": method.as_str(),
            "periods": periods,
            "start_day": start,
            "value": values.first().copied().unwrap_or_default(),
            "days_written": written,
        }))
    }
}

fn invalid(tool: &str, detail: &str) -> ToolError {
    ToolError::InvalidArguments { tool: tool.to_string(), detail: detail.to_string() }
}

fn optional_str<'a>(
    tool: &str,
    arguments: &'a Value,
    field: &str,
) -> Result<Option<&'a str>, ToolError> {
    match arguments.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(_) => Err(invalid(tool, &format!("`{field}` must be a string"))),
    }
}

fn required_str<'a>(tool: &str, arguments: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    optional_str(tool, arguments, field)?
        .ok_or_else(|| invalid(tool, &format!("`{field}` is required")))
}

fn required_f64(tool: &str, arguments: &Value, field: &str) -> Result<f64, ToolError> {
    match arguments.get(field) {
        None | Some(Value::Null) => Err(invalid(tool, &format!("`{field}` is required"))),
        Some(value) => {
            value.as_f64().ok_or_else(|| invalid(tool, &format!("`{field}` must be a number")))
        }
    }
}

fn optional_u64(tool: &str, arguments: &Value, field: &str) -> Result<Option<u64>, ToolError> {
    match arguments.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(tool, &format!("`{field}` must be a non-negative integer"))),
    }
}

fn required_u64(tool: &str, arguments: &Value, field: &str) -> Result<u64, ToolError> {
    optional_u64(tool, arguments, field)?
        .ok_or_else(|| invalid(tool, &format!("`{field}` is required")))
}
