use stocky_core::routing::SpecialistKind;

use crate::tools::{
    self, ToolSpec, CALCULATE_DEMAND_FORECAST, CLEAR_ALL_FORECAST, DELETE_ALL_DATA,
    GENERATE_FUTURE_DATA, GET_DAILY_DATA, GET_DEMAND_SUMMARY, GET_INVENTORY_SUMMARY,
    GET_PRODUCTION_SUMMARY, GET_STOCKOUTS, INCREASE_ALL_DEMAND, PROPOSE_PRODUCTION_PLAN,
    UPDATE_DEMAND, UPDATE_PRODUCTION_PLAN,
};

/// Tool bindings are disjoint by role; `get_daily_data` is the one shared
/// read tool.
pub const PRODUCTION_TOOLS: &[&str] = &[
    GET_DAILY_DATA,
    UPDATE_PRODUCTION_PLAN,
    GET_PRODUCTION_SUMMARY,
    GET_INVENTORY_SUMMARY,
    GET_STOCKOUTS,
    PROPOSE_PRODUCTION_PLAN,
];

pub const DEMAND_TOOLS: &[&str] = &[
    GET_DAILY_DATA,
    UPDATE_DEMAND,
    GET_DEMAND_SUMMARY,
    INCREASE_ALL_DEMAND,
    CALCULATE_DEMAND_FORECAST,
    CLEAR_ALL_FORECAST,
];

pub const DATA_TOOLS: &[&str] = &[GET_DAILY_DATA, GENERATE_FUTURE_DATA, DELETE_ALL_DATA];

const PRODUCTION_INSTRUCTIONS: &str = "\
You are the production planner for a daily supply-chain series. Each stored \
day has a demand, a production plan, a derived inventory balance and an \
optional forecast. You handle production plans, inventory levels and stockout \
coverage.

Use your tools to read before you conclude anything; never estimate a number \
you can fetch. A stockout is a day whose inventory balance is zero or below. \
When asked to fix stockouts, fetch the advisory plan first and base your \
changes on it.

When a change to stored data is needed, call the matching tool directly. The \
runtime shows the user exactly what you intend and waits for their explicit \
confirmation before anything is written, so do not ask for permission in \
prose yourself. Dates are calendar days; prefer the YYYY-MM-DD form.";

const DEMAND_INSTRUCTIONS: &str = "\
You are the demand planner for a daily supply-chain series. Each stored day \
has a demand, a production plan, a derived inventory balance and an optional \
forecast. You handle demand figures and demand forecasting.

Use your tools to read before you conclude anything; never estimate a number \
you can fetch. Forecasts project future demand from history with a moving \
average or exponential smoothing and are stored separately from demand, so \
running one never changes demand, production or inventory.

When a change to stored data is needed, call the matching tool directly. The \
runtime shows the user exactly what you intend and waits for their explicit \
confirmation before anything is written, so do not ask for permission in \
prose yourself. Dates are calendar days; prefer the YYYY-MM-DD form.";

const DATA_INSTRUCTIONS: &str = "\
You are the data steward for a daily supply-chain series. You generate demo \
records and purge stored data; you do not plan production or demand.

Generated records use plausible randomized demand and production values over \
a consecutive date range. Deleting all data is irreversible and removes every \
stored day.

When a change to stored data is needed, call the matching tool directly. The \
runtime shows the user exactly what you intend and waits for their explicit \
confirmation before anything is written, so do not ask for permission in \
prose yourself. Dates are calendar days; prefer the YYYY-MM-DD form.";

#[derive(Clone, Copy, Debug)]
pub struct SpecialistProfile {
    pub kind: SpecialistKind,
    pub instructions: &'static str,
    pub tools: &'static [&'static str],
}

pub fn profile(kind: SpecialistKind) -> SpecialistProfile {
    match kind {
        SpecialistKind::Production => SpecialistProfile {
            kind,
            instructions: PRODUCTION_INSTRUCTIONS,
            tools: PRODUCTION_TOOLS,
        },
        SpecialistKind::Demand => SpecialistProfile {
            kind,
            instructions: DEMAND_INSTRUCTIONS,
            tools: DEMAND_TOOLS,
        },
        SpecialistKind::Data => SpecialistProfile {
            kind,
            instructions: DATA_INSTRUCTIONS,
            tools: DATA_TOOLS,
        },
    }
}

pub fn toolset(kind: SpecialistKind) -> &'static [&'static str] {
    profile(kind).tools
}

/// Catalog entries for one specialist, in binding order.
pub fn toolset_specs(kind: SpecialistKind) -> Vec<ToolSpec> {
    toolset(kind)
        .iter()
        .filter_map(|name| tools::find_spec(name))
        .collect()
}
