use log::{error, info};
use serde::Serialize;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;

use wastezone::config::Config;
use wastezone::domain::{Actor, PriorityLevel, ReportId, ScheduleId, UserId, ZoneId};
use wastezone::engine::achievements::{default_catalog, load_catalog};
use wastezone::engine::{ReportSubmission, Resolution};
use wastezone::notify::LogSink;
use wastezone::services::seed;
use wastezone::store::{PgStore, Store};
use wastezone::{Engine, EngineError};

const USAGE: &str = "usage: wastezone [--env-file PATH] <command> [args]

commands:
  migrate                                   apply pending database migrations
  seed [--demo]                             install the achievement catalog (and demo data)
  queue                                     list zones waiting for collection
  zone <zone>                               show a zone and its schedules
  submit <user> <zone> <percent> [text]     file a report
  verify <admin> <report> [percent]         verify a report, optionally correcting the level
  reject <admin> <report> <reason>          reject a report
  resolve <user> <report> [--collected]     resolve a verified report
  comment <user> <report> <text>            comment on a report
  history <report>                          show a report's audit trail
  sensor <zone> <percent>                   record a sensor reading
  priority <admin> <zone> <low|medium|high> override a zone's priority
  schedule <zone> [minutes] [notes]         make sure a zone has a collection scheduled
  assign <admin> <schedule> <collector>     assign a schedule to a collector
  start <user> <schedule>                   start a collection run
  complete <user> <schedule> [minutes]      complete a collection run
  cancel <user> <schedule>                  cancel a schedule
  evaluate <user>                           grant achievements the user qualifies for";

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

/// Positional command arguments.
#[derive(Debug)]
struct Args {
    items: VecDeque<String>,
}

impl Args {
    fn next(&mut self, name: &str) -> Result<String, String> {
        self.items
            .pop_front()
            .ok_or_else(|| format!("missing argument <{}>\n\n{}", name, USAGE))
    }

    fn optional(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    fn id(&mut self, name: &str) -> Result<i64, String> {
        let raw = self.next(name)?;
        raw.parse().map_err(|_| format!("<{}> must be a numeric id, got `{}`", name, raw))
    }

    fn percent(raw: &str) -> Result<f64, String> {
        raw.trim_end_matches('%')
            .parse()
            .map_err(|_| format!("`{}` is not a percentage", raw))
    }

    /// Joins everything left into one string.
    fn rest(&mut self) -> Option<String> {
        let words: Vec<String> = self.items.drain(..).collect();
        if words.is_empty() { None } else { Some(words.join(" ")) }
    }

    fn finish(&self) -> Result<(), String> {
        match self.items.front() {
            Some(extra) => Err(format!("unexpected argument `{}`\n\n{}", extra, USAGE)),
            None => Ok(()),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| format!("failed to encode output: {}", e))?;
    println!("{}", text);
    Ok(())
}

/// Prints the result of an engine operation. A transition that was already
/// applied is reported and treated as success.
fn report_outcome<T: Serialize>(result: Result<T, EngineError>) -> Result<(), String> {
    match result {
        Ok(value) => print_json(&value),
        Err(e) if e.is_noop() => {
            info!("Nothing to do: {}", e);
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}

fn actor<S: Store, N: wastezone::notify::NotificationSink>(
    engine: &mut Engine<S, N>,
    args: &mut Args,
    name: &str,
) -> Result<Actor, String> {
    let id = args.id(name)?;
    engine.actor(UserId(id)).map_err(|e| e.to_string())
}

fn run(mut args: Args) -> Result<(), String> {
    let command = args.next("command")?;

    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (points={}/{}/{}, first_zone_bonus={}, offsets={}h/{}h/{}h, max_conflict_attempts={}, auto_schedule_urgent={})",
        cfg.engine.points.low,
        cfg.engine.points.medium,
        cfg.engine.points.high,
        cfg.engine.points.first_zone_report_bonus,
        cfg.engine.schedule_offsets.low.num_hours(),
        cfg.engine.schedule_offsets.medium.num_hours(),
        cfg.engine.schedule_offsets.high.num_hours(),
        cfg.engine.max_conflict_attempts,
        cfg.engine.auto_schedule_urgent
    );

    // 2) Connect DB and apply pending migrations
    let mut store = PgStore::connect(&cfg.database_url).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database");
    store.apply_migrations()?;
    if command == "migrate" {
        return args.finish();
    }

    let mut engine = Engine::new(store, LogSink, cfg.engine.clone());

    match command.as_str() {
        "seed" => {
            let demo = match args.optional().as_deref() {
                None => false,
                Some("--demo") => true,
                Some(other) => return Err(format!("unexpected argument `{}`\n\n{}", other, USAGE)),
            };
            let catalog = match &cfg.achievements_file {
                Some(path) => {
                    info!("Loading achievement catalog from {}", path.display());
                    load_catalog(path)?
                }
                None => default_catalog(),
            };
            let summary = seed::run(&mut engine, &catalog, demo)?;
            info!(
                "Seed complete (achievements={}, users={}, zones={}, reports={})",
                summary.achievements, summary.users, summary.zones, summary.reports
            );
            Ok(())
        }
        "queue" => {
            args.finish()?;
            report_outcome(engine.collection_queue())
        }
        "zone" => {
            let zone = ZoneId(args.id("zone")?);
            args.finish()?;
            let store = engine.store_mut();
            let details = match store.zone(zone) {
                Ok(found) => store.schedules_for_zone(zone).map(|schedules| (found, schedules)),
                Err(e) => Err(e),
            };
            report_outcome(details)
        }
        "submit" => {
            let reporter = actor(&mut engine, &mut args, "user")?;
            let zone = ZoneId(args.id("zone")?);
            let fill = Args::percent(&args.next("percent")?)?;
            let mut submission = ReportSubmission::new(zone, fill);
            submission.description = args.rest();
            report_outcome(engine.submit_report(reporter, submission))
        }
        "verify" => {
            let admin = actor(&mut engine, &mut args, "admin")?;
            let report = ReportId(args.id("report")?);
            let corrected = args.optional().map(|raw| Args::percent(&raw)).transpose()?;
            args.finish()?;
            report_outcome(engine.verify_report(admin, report, corrected))
        }
        "reject" => {
            let admin = actor(&mut engine, &mut args, "admin")?;
            let report = ReportId(args.id("report")?);
            let reason = args.rest().ok_or_else(|| format!("missing argument <reason>\n\n{}", USAGE))?;
            report_outcome(engine.reject_report(admin, report, &reason))
        }
        "resolve" => {
            let user = actor(&mut engine, &mut args, "user")?;
            let report = ReportId(args.id("report")?);
            let resolution = match args.optional().as_deref() {
                None => Resolution::Administrative,
                Some("--collected") => Resolution::Collected,
                Some(other) => return Err(format!("unexpected argument `{}`\n\n{}", other, USAGE)),
            };
            report_outcome(engine.resolve_report(user, report, resolution))
        }
        "comment" => {
            let user = actor(&mut engine, &mut args, "user")?;
            let report = ReportId(args.id("report")?);
            let text = args.rest().ok_or_else(|| format!("missing argument <text>\n\n{}", USAGE))?;
            report_outcome(engine.comment_report(user, report, &text))
        }
        "history" => {
            let report = ReportId(args.id("report")?);
            args.finish()?;
            report_outcome(engine.report_actions(report))
        }
        "sensor" => {
            let zone = ZoneId(args.id("zone")?);
            let fill = Args::percent(&args.next("percent")?)?;
            args.finish()?;
            report_outcome(engine.record_sensor_reading(zone, fill))
        }
        "priority" => {
            let admin = actor(&mut engine, &mut args, "admin")?;
            let zone = ZoneId(args.id("zone")?);
            let tier: PriorityLevel = args.next("tier")?.parse()?;
            args.finish()?;
            report_outcome(engine.override_priority(admin, zone, tier))
        }
        "schedule" => {
            let zone = ZoneId(args.id("zone")?);
            let estimated_duration_minutes = args
                .optional()
                .map(|raw| raw.parse::<i32>().map_err(|_| format!("`{}` is not a number of minutes", raw)))
                .transpose()?;
            let request = wastezone::engine::ScheduleRequest {
                notes: args.rest(),
                estimated_duration_minutes,
            };
            report_outcome(engine.ensure_scheduled_with(zone, request))
        }
        "assign" => {
            let admin = actor(&mut engine, &mut args, "admin")?;
            let schedule = ScheduleId(args.id("schedule")?);
            let collector = UserId(args.id("collector")?);
            args.finish()?;
            report_outcome(engine.assign_schedule(admin, schedule, collector))
        }
        "start" => {
            let user = actor(&mut engine, &mut args, "user")?;
            let schedule = ScheduleId(args.id("schedule")?);
            args.finish()?;
            report_outcome(engine.start_schedule(user, schedule))
        }
        "complete" => {
            let user = actor(&mut engine, &mut args, "user")?;
            let schedule = ScheduleId(args.id("schedule")?);
            let minutes = args
                .optional()
                .map(|raw| raw.parse::<i32>().map_err(|_| format!("`{}` is not a number of minutes", raw)))
                .transpose()?;
            args.finish()?;
            report_outcome(engine.complete_schedule(user, schedule, minutes))
        }
        "cancel" => {
            let user = actor(&mut engine, &mut args, "user")?;
            let schedule = ScheduleId(args.id("schedule")?);
            args.finish()?;
            report_outcome(engine.cancel_schedule(user, schedule))
        }
        "evaluate" => {
            let user = UserId(args.id("user")?);
            args.finish()?;
            let counters = engine.activity_counters(user).map_err(|e| e.to_string())?;
            info!(
                "User {} counters: reports={}, points={}, streak={}d, zones={}",
                user, counters.reports_count, counters.points_earned, counters.consecutive_days, counters.zone_coverage
            );
            report_outcome(engine.evaluate_user(user))
        }
        other => Err(format!("unknown command `{}`\n\n{}", other, USAGE)),
    }
}

/// What the process was asked to do, before any environment is loaded.
#[derive(Debug)]
enum Invocation {
    Help,
    Run { env_file: Option<PathBuf>, args: Args },
}

/// Splits off `--env-file` and `--help` from the command arguments.
fn parse_invocation(mut args: impl Iterator<Item = OsString>) -> Result<Invocation, String> {
    let mut env_file: Option<PathBuf> = None;
    let mut rest = VecDeque::new();

    while let Some(arg) = args.next() {
        let arg = arg
            .into_string()
            .map_err(|_| "argument contains invalid UTF-8".to_string())?;
        if !rest.is_empty() {
            rest.push_back(arg);
            continue;
        }
        match arg.as_str() {
            "--env-file" => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            s if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            "-h" | "--help" => return Ok(Invocation::Help),
            _ => rest.push_back(arg),
        }
    }
    Ok(Invocation::Run {
        env_file,
        args: Args { items: rest },
    })
}

/// Loads the env file named on the command line, or `./.env` if present.
/// Returns `None` when only usage was requested.
fn configure_env_from_cli() -> Result<Option<(Option<LoadedEnvFile>, Args)>, String> {
    let (env_file, args) = match parse_invocation(std::env::args_os().skip(1))? {
        Invocation::Help => return Ok(None),
        Invocation::Run { env_file, args } => (env_file, args),
    };

    // dotenvy never overrides variables already set in the process environment
    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        dotenvy::from_path(&path).map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
        Ok(Some((Some(LoadedEnvFile { path, explicit: true }), args)))
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            dotenvy::from_path(&default_path).map_err(|e| format!("failed to load {}: {}", default_path.display(), e))?;
            Ok(Some((
                Some(LoadedEnvFile {
                    path: default_path,
                    explicit: false,
                }),
                args,
            )))
        } else {
            Ok(Some((None, args)))
        }
    }
}

fn main() {
    let (loaded_env, args) = match configure_env_from_cli() {
        Ok(Some(loaded)) => loaded,
        Ok(None) => {
            println!("{}", USAGE);
            return;
        }
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "wastezone {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(args) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(args: &[&str]) -> Result<Invocation, String> {
        parse_invocation(args.iter().map(|a| OsString::from(*a)))
    }

    #[test]
    fn help_is_not_an_error() {
        assert!(matches!(invocation(&["--help"]), Ok(Invocation::Help)));
        assert!(matches!(invocation(&["--env-file", "x.env", "-h"]), Ok(Invocation::Help)));
    }

    #[test]
    fn env_file_is_split_from_the_command() {
        match invocation(&["--env-file=prod.env", "queue"]).unwrap() {
            Invocation::Run { env_file, args } => {
                assert_eq!(env_file, Some(PathBuf::from("prod.env")));
                assert_eq!(args.items, VecDeque::from(vec!["queue".to_string()]));
            }
            Invocation::Help => panic!("expected a command"),
        }
        // after the command, flags belong to it
        match invocation(&["submit", "--help"]).unwrap() {
            Invocation::Run { env_file, args } => {
                assert!(env_file.is_none());
                assert_eq!(args.items.len(), 2);
            }
            Invocation::Help => panic!("expected a command"),
        }
        assert!(invocation(&["--env-file"]).is_err());
        assert!(invocation(&["--env-file=a", "--env-file=b"]).is_err());
    }
}
