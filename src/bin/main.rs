// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use recycle_ledger::{
    Engine, LedgerError, LedgerStore, MemoryStore, NewUser, Points, Rates, RewardId, SledStore,
    User, UserCode, UserType,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Recycle Ledger - Replay ledger operations from CSV files
///
/// Registers users, replays recycling, cooperative deposits, transfers,
/// catalog entries and redemptions, then writes every user's balance to
/// stdout. Logs go to stderr; set RUST_LOG to adjust verbosity.
#[derive(Parser, Debug)]
#[command(name = "recycle-ledger")]
#[command(about = "Replays points ledger operations from CSV", long_about = None)]
struct Args {
    /// Path to CSV file with ledger operations
    ///
    /// Expected format: op,user,target,value
    /// Example: recycle-ledger --users users.csv ops.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// CSV of users to register first (code,name,email,type,can_redeem)
    #[arg(long, value_name = "FILE")]
    users: Option<PathBuf>,

    /// Persist the ledger in a sled database at this directory
    #[arg(long, value_name = "DIR")]
    db: Option<PathBuf>,

    /// Points per unit of recycled weight
    #[arg(long, default_value_t = Rates::DEFAULT_RECYCLING)]
    recycling_rate: Points,

    /// Points per unit of cash deposited by a cooperative
    #[arg(long, default_value_t = Rates::DEFAULT_COOPERATIVE)]
    cooperative_rate: Points,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("error opening file '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error reading CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

fn main() {
    init_logging();
    let args = Args::parse();
    let rates = Rates {
        recycling_points_per_unit: args.recycling_rate,
        cooperative_points_per_unit: args.cooperative_rate,
    };

    let result = match &args.db {
        Some(path) => SledStore::open(path)
            .map_err(CliError::from)
            .and_then(|store| {
                let engine = Engine::with_rates(store, rates);
                run(&engine, &args)?;
                engine.store().flush()?;
                Ok(())
            }),
        None => run(&Engine::with_rates(MemoryStore::new(), rates), &args),
    };

    if let Err(e) = result {
        error!("{e}");
        process::exit(1);
    }
}

/// Logs to stderr; stdout carries the balance report.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recycle_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run<S: LedgerStore>(engine: &Engine<S>, args: &Args) -> Result<(), CliError> {
    if let Some(path) = &args.users {
        let registered = seed_users(engine, BufReader::new(open(path)?))?;
        info!(registered, "users loaded");
    }

    let applied = process_operations(engine, BufReader::new(open(&args.input)?))?;
    info!(applied, "operations replayed");

    write_users(engine, std::io::stdout())?;
    Ok(())
}

fn open(path: &Path) -> Result<File, CliError> {
    File::open(path).map_err(|source| CliError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " recycle "
        .flexible(true) // Allow missing trailing fields
        .has_headers(true)
        .from_reader(reader)
}

/// Raw CSV record of the users file.
///
/// Fields: `code, name, email, type, can_redeem`
#[derive(Debug, Deserialize)]
struct UserRecord {
    code: String,
    name: String,
    email: String,
    #[serde(rename = "type")]
    user_type: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    can_redeem: Option<bool>,
}

impl UserRecord {
    fn into_new_user(self) -> Result<NewUser, LedgerError> {
        let user_type: UserType = self.user_type.parse()?;
        Ok(NewUser::new(self.code.as_str(), self.name, self.email, user_type)
            .with_can_redeem(self.can_redeem.unwrap_or(true)))
    }
}

/// Registers users from a CSV reader.
///
/// Users that already exist (re-running against a persistent store) are
/// skipped. Returns the number of users registered.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn seed_users<S: LedgerStore, R: Read>(
    engine: &Engine<S>,
    reader: R,
) -> Result<usize, csv::Error> {
    let mut registered = 0;
    for result in csv_reader(reader).deserialize::<UserRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("skipping malformed user row: {e}");
                continue;
            }
        };
        match record.into_new_user().and_then(|user| engine.register_user(user)) {
            Ok(_) => registered += 1,
            Err(LedgerError::DuplicateUser) => debug!("user already registered"),
            Err(e) => warn!("skipping user: {e}"),
        }
    }
    Ok(registered)
}

/// Raw CSV record of the operations file.
///
/// Fields: `op, user, target, value`
#[derive(Debug, Deserialize)]
struct OperationRecord {
    op: String,
    user: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// A parsed ledger operation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Recycle { user: UserCode, weight: Decimal },
    Deposit { user: UserCode, amount: Decimal },
    Transfer { from: UserCode, to: UserCode, points: Points },
    CreateReward { caller: UserCode, name: String, points: Points },
    Redeem { user: UserCode, reward: RewardId },
}

impl OperationRecord {
    /// Converts the CSV record to an [`Operation`].
    ///
    /// Returns `None` for unknown operations or missing/unparseable fields.
    fn into_operation(self) -> Option<Operation> {
        let user = UserCode::new(self.user);
        let target = self.target.filter(|t| !t.is_empty());
        let value = self.value.filter(|v| !v.is_empty());

        match self.op.to_lowercase().as_str() {
            "recycle" => Some(Operation::Recycle {
                user,
                weight: value?.parse().ok()?,
            }),
            "deposit" => Some(Operation::Deposit {
                user,
                amount: value?.parse().ok()?,
            }),
            "transfer" => Some(Operation::Transfer {
                from: user,
                to: UserCode::new(target?),
                points: value?.parse().ok()?,
            }),
            "reward" => Some(Operation::CreateReward {
                caller: user,
                name: target?,
                points: value?.parse().ok()?,
            }),
            "redeem" => Some(Operation::Redeem {
                user,
                reward: RewardId(target?.parse().ok()?),
            }),
            _ => None,
        }
    }
}

fn apply<S: LedgerStore>(engine: &Engine<S>, operation: Operation) -> Result<(), LedgerError> {
    let lookup = |code: &UserCode| -> Result<User, LedgerError> {
        engine
            .get_user_by_code(code)?
            .ok_or(LedgerError::NotFound("user"))
    };

    match operation {
        Operation::Recycle { user, weight } => {
            engine.record_recycling(lookup(&user)?.id, weight)?;
        }
        Operation::Deposit { user, amount } => {
            engine.record_cooperative_deposit(lookup(&user)?.id, amount)?;
        }
        Operation::Transfer { from, to, points } => {
            engine.transfer_p2p(&from, &to, points)?;
        }
        Operation::CreateReward {
            caller,
            name,
            points,
        } => {
            engine.create_reward(lookup(&caller)?.user_type, &name, points)?;
        }
        Operation::Redeem { user, reward } => {
            engine.exchange_points_for_reward(&user, reward)?;
        }
    }
    Ok(())
}

/// Replays ledger operations from a CSV reader.
///
/// Malformed rows and rejected operations are logged and skipped; they
/// never stop processing. Returns the number of operations applied.
///
/// # CSV Format
///
/// Expected columns: `op, user, target, value`
/// - `recycle,<code>,,<weight>`
/// - `deposit,<code>,,<amount>`
/// - `transfer,<from>,<to>,<points>`
/// - `reward,<admin code>,<name>,<points>`
/// - `redeem,<code>,<reward id>,`
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_operations<S: LedgerStore, R: Read>(
    engine: &Engine<S>,
    reader: R,
) -> Result<usize, csv::Error> {
    let mut applied = 0;
    for (line, result) in csv_reader(reader).deserialize::<OperationRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(line, "skipping malformed row: {e}");
                continue;
            }
        };
        let Some(operation) = record.into_operation() else {
            warn!(line, "skipping invalid operation record");
            continue;
        };
        match apply(engine, operation) {
            Ok(()) => applied += 1,
            Err(e) => debug!(line, "operation not applied: {e}"),
        }
    }
    Ok(applied)
}

/// One output row per user.
#[derive(Debug, Serialize)]
struct UserRow<'a> {
    id: u64,
    code: &'a str,
    name: &'a str,
    #[serde(rename = "type")]
    user_type: &'static str,
    points: Points,
    can_redeem: bool,
}

/// Writes every user's balance as CSV, ordered by id.
///
/// Columns: `id, code, name, type, points, can_redeem`
///
/// # Errors
///
/// Returns an error if reading the store or writing fails.
fn write_users<S: LedgerStore, W: Write>(engine: &Engine<S>, writer: W) -> Result<(), CliError> {
    let mut wtr = Writer::from_writer(writer);

    for user in engine.users()? {
        wtr.serialize(UserRow {
            id: user.id.0,
            code: user.user_code.as_str(),
            name: &user.full_name,
            user_type: user.user_type.as_str(),
            points: user.total_points,
            can_redeem: user.can_redeem_rewards,
        })?;
    }

    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    const USERS: &str = "code,name,email,type,can_redeem\n\
                         ana,Ana Souza,ana@example.com,normal,true\n\
                         bia,Bia Lima,bia@example.com,normal,\n\
                         coop,Coop Verde,coop@example.com,cooperative,false\n\
                         root,Admin,admin@example.com,admin,true\n";

    fn seeded() -> Engine<MemoryStore> {
        let engine = Engine::in_memory();
        let registered = seed_users(&engine, Cursor::new(USERS)).unwrap();
        assert_eq!(registered, 4);
        engine
    }

    fn points(engine: &Engine<MemoryStore>, code: &str) -> Points {
        engine
            .get_user_by_code(&code.into())
            .unwrap()
            .unwrap()
            .total_points
    }

    #[test]
    fn seed_defaults_can_redeem_to_true() {
        let engine = seeded();
        let bia = engine.get_user_by_code(&"bia".into()).unwrap().unwrap();
        let coop = engine.get_user_by_code(&"coop".into()).unwrap().unwrap();
        assert!(bia.can_redeem_rewards);
        assert!(!coop.can_redeem_rewards);
    }

    #[test]
    fn seeding_twice_skips_existing_users() {
        let engine = seeded();
        let registered = seed_users(&engine, Cursor::new(USERS)).unwrap();
        assert_eq!(registered, 0);
        assert_eq!(engine.users().unwrap().len(), 4);
    }

    #[test]
    fn parse_recycle_and_transfer() {
        let engine = seeded();
        let ops = "op,user,target,value\n\
                   recycle,ana,,10\n\
                   transfer,ana,bia,30\n";

        let applied = process_operations(&engine, Cursor::new(ops)).unwrap();

        assert_eq!(applied, 2);
        assert_eq!(points(&engine, "ana"), 70);
        assert_eq!(points(&engine, "bia"), 30);
    }

    #[test]
    fn parse_cooperative_deposit() {
        let engine = seeded();
        let ops = "op,user,target,value\ndeposit,coop,,1.5\n";

        process_operations(&engine, Cursor::new(ops)).unwrap();

        assert_eq!(points(&engine, "coop"), 30);
    }

    #[test]
    fn parse_reward_and_redeem() {
        let engine = seeded();
        let ops = "op,user,target,value\n\
                   recycle,ana,,5\n\
                   reward,root,Mug,40\n\
                   redeem,ana,1,\n";

        let applied = process_operations(&engine, Cursor::new(ops)).unwrap();

        assert_eq!(applied, 3);
        assert_eq!(points(&engine, "ana"), 10);
        assert_eq!(engine.get_user_rewards(&"ana".into()).unwrap().len(), 1);
    }

    #[test]
    fn rejected_operations_are_skipped() {
        let engine = seeded();
        let ops = "op,user,target,value\n\
                   recycle,coop,,5\n\
                   transfer,ana,bia,1\n\
                   reward,ana,Mug,40\n\
                   recycle,ana,,2\n";

        let applied = process_operations(&engine, Cursor::new(ops)).unwrap();

        assert_eq!(applied, 1);
        assert_eq!(points(&engine, "coop"), 0);
        assert_eq!(points(&engine, "ana"), 20);
        assert!(engine.get_available_rewards().unwrap().is_empty());
    }

    #[test]
    fn parse_with_whitespace_and_unknown_ops() {
        let engine = seeded();
        let ops = "op,user,target,value\n \
                   Recycle , ana , , 1.5 \n\
                   teleport,ana,bia,3\n\
                   transfer,ana,,3\n";

        let applied = process_operations(&engine, Cursor::new(ops)).unwrap();

        assert_eq!(applied, 1);
        assert_eq!(points(&engine, "ana"), 15);
    }

    #[test]
    fn operation_record_parsing() {
        let record = OperationRecord {
            op: "recycle".into(),
            user: "ana".into(),
            target: None,
            value: Some("2.5".into()),
        };
        assert_eq!(
            record.into_operation(),
            Some(Operation::Recycle {
                user: "ana".into(),
                weight: dec!(2.5),
            })
        );

        let missing_value = OperationRecord {
            op: "deposit".into(),
            user: "coop".into(),
            target: None,
            value: None,
        };
        assert_eq!(missing_value.into_operation(), None);
    }

    #[test]
    fn write_users_to_csv() {
        let engine = seeded();
        process_operations(&engine, Cursor::new("op,user,target,value\nrecycle,ana,,3\n")).unwrap();

        let mut output = Vec::new();
        write_users(&engine, &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("id,code,name,type,points,can_redeem"));
        assert_eq!(lines.next(), Some("1,ana,Ana Souza,normal,30,true"));
        assert_eq!(output.lines().count(), 5);
    }
}
