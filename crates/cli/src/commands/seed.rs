use crate::commands::CommandResult;
use stocky_core::calendar::DayKey;
use stocky_core::config::{AppConfig, LoadOptions};
use stocky_db::{connect_with_settings, ensure_schema, DemoDataset, SeedResult, SqlRecordStore};

pub fn run(start: Option<String>, days: Option<u32>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let start_day = match start {
        Some(raw) => match DayKey::normalize(&raw) {
            Ok(day) => day,
            Err(error) => {
                return CommandResult::failure("seed", "invalid_arguments", error.to_string(), 2);
            }
        },
        None => DayKey::new(chrono::Utc::now().date_naive()),
    };
    let days = days.unwrap_or(stocky_db::DEFAULT_SEED_DAYS);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        ensure_schema(&pool)
            .await
            .map_err(|error| ("schema_setup", error.to_string(), 5u8))?;

        let store = SqlRecordStore::new(pool.clone());
        let seeded = DemoDataset::seed(&store, start_day, days)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verified = DemoDataset::verify(&store)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result = if verified.balanced {
            Ok(seeded)
        } else {
            Err((
                "seed_verification",
                format!(
                    "inventory balances do not reconcile across the {} stored days",
                    verified.days_checked
                ),
                6u8,
            ))
        };
        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", render_success(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn render_success(seeded: &SeedResult) -> String {
    format!(
        "seeded {} synthetic days ({} to {}), balances verified",
        seeded.days_seeded, seeded.first_day, seeded.last_day
    )
}

#[cfg(test)]
mod tests {
    use stocky_core::calendar::DayKey;
    use stocky_db::SeedResult;

    use super::render_success;

    #[test]
    fn success_message_names_the_day_span() {
        let seeded = SeedResult {
            days_seeded: 10,
            first_day: DayKey::parse_iso("2024-07-01").expect("valid date"),
            last_day: DayKey::parse_iso("2024-07-10").expect("valid date"),
        };

        assert_eq!(
            render_success(&seeded),
            "seeded 10 synthetic days (2024-07-01 to 2024-07-10), balances verified"
        );
    }
}
