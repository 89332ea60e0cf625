//! Sessions driven through the `mongo` shell.
//!
//! Each operation runs the shell once with a script that prints a single JSON
//! object. Scripts catch their own exceptions and report them as
//! `{"ok": 0, "errmsg": ...}`, so server refusals surface as structured
//! errors instead of shell noise.
//!
//! Scripts, and the credentials they authenticate with, are written to an
//! owner-only temporary file whose path is the shell's last argument. Nothing
//! secret appears on the shell's command line.

use std::io::Write;
use std::process::Command;
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::SESSION_TARGET;
use crate::error::SessionError;
use crate::session::{AdminSession, DialInfo, SessionDialer, StateSession};

/// Database holding the environment control records.
pub const STATE_DATABASE: &str = "corral";

const NOT_AUTHORIZED: &str = "not authorized";
const UNREACHABLE_MARKERS: [&str; 4] = [
    "couldn't connect",
    "connect failed",
    "Connection refused",
    "connection attempt failed",
];

/// The shell executable plus any arguments that precede the session flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoShell {
    program: Utf8PathBuf,
    leading_args: Vec<String>,
}

impl MongoShell {
    /// Uses the shell binary at `program`.
    #[must_use]
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn scripted(script: &str) -> Self {
        Self {
            program: Utf8PathBuf::from("/bin/sh"),
            leading_args: vec!["-c".to_owned(), script.to_owned(), "mongo".to_owned()],
        }
    }
}

/// Dials by pinging the server through the shell.
#[derive(Debug, Clone)]
pub struct MongoShellDialer {
    shell: MongoShell,
}

impl MongoShellDialer {
    /// Creates a dialer.
    #[must_use]
    pub const fn new(shell: MongoShell) -> Self {
        Self { shell }
    }
}

impl SessionDialer for MongoShellDialer {
    fn dial(&self, info: &DialInfo) -> Result<Box<dyn AdminSession>, SessionError> {
        let mut session = ShellSession::new(self.shell.clone(), info.clone());
        session.run("admin", "print(JSON.stringify(db.adminCommand({ping: 1})));")?;
        Ok(Box::new(session))
    }
}

/// A logical session; every operation spawns the shell.
#[derive(Debug, Clone)]
pub struct ShellSession {
    shell: MongoShell,
    info: DialInfo,
    credentials: Option<(String, String)>,
}

impl ShellSession {
    /// Creates a session without credentials.
    #[must_use]
    pub const fn new(shell: MongoShell, info: DialInfo) -> Self {
        Self {
            shell,
            info,
            credentials: None,
        }
    }

    /// Authenticates subsequent operations against the admin database.
    #[must_use]
    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.credentials = Some((user.to_owned(), password.to_owned()));
        self
    }

    fn script(&self, body: &str) -> String {
        let login = self
            .credentials
            .as_ref()
            .map(|(user, password)| {
                format!(
                    "if (!db.getSiblingDB(\"admin\").auth({user}, {password})) \
                     {{ throw \"authentication failed for \" + {user}; }} ",
                    user = js(user),
                    password = js(password),
                )
            })
            .unwrap_or_default();
        format!(
            "try {{ {login}{body} }} \
             catch (e) {{ print(JSON.stringify({{ok: 0, errmsg: String(e)}})); }}\n"
        )
    }

    fn run(&mut self, database: &str, body: &str) -> Result<Value, SessionError> {
        let address = self.info.primary_address().to_owned();
        let client = |source| SessionError::Client {
            program: self.shell.program.clone(),
            source: Arc::new(source),
        };
        let mut script = NamedTempFile::new().map_err(client)?;
        script
            .write_all(self.script(body).as_bytes())
            .and_then(|()| script.flush())
            .map_err(client)?;

        let mut command = Command::new(&self.shell.program);
        command.args(&self.shell.leading_args);
        command.args(["--quiet", "--host", address.as_str()]);
        if self.info.tls {
            command.args(["--ssl", "--sslAllowInvalidCertificates"]);
        }
        command.arg(database).arg(script.path());

        let output = command.output().map_err(client)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            target: SESSION_TARGET,
            address = %address,
            status = %output.status,
            "mongo shell finished"
        );
        let combined = format!("{stdout}\n{stderr}");
        if let Some(message) = unauthorized_message(&combined) {
            return Err(SessionError::Unauthorized { message });
        }
        if UNREACHABLE_MARKERS
            .iter()
            .any(|marker| combined.contains(marker))
        {
            return Err(SessionError::Unreachable {
                address,
                message: combined.trim().to_owned(),
            });
        }
        if !output.status.success() {
            return Err(SessionError::Command {
                message: combined.trim().to_owned(),
            });
        }
        let reply = last_json_line(&stdout).ok_or_else(|| SessionError::Output {
            output: stdout.trim().to_owned(),
        })?;
        match reply.get("ok").and_then(Value::as_f64) {
            Some(ok) if ok >= 1.0 => Ok(reply),
            _ => Err(SessionError::Command {
                message: reply
                    .get("errmsg")
                    .and_then(Value::as_str)
                    .map_or_else(|| reply.to_string(), str::to_owned),
            }),
        }
    }
}

fn unauthorized_message(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.find(NOT_AUTHORIZED).map(|start| {
            let tail = line.get(start..).unwrap_or(line);
            tail.trim_end_matches(['"', '}', ' ']).to_owned()
        })
    })
}

fn last_json_line(stdout: &str) -> Option<Value> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}

fn js(value: &str) -> String {
    Value::String(value.to_owned()).to_string()
}

fn js_list(values: &[impl AsRef<str>]) -> String {
    Value::Array(
        values
            .iter()
            .map(|value| Value::String(value.as_ref().to_owned()))
            .collect(),
    )
    .to_string()
}

impl AdminSession for ShellSession {
    fn user_count(&mut self) -> Result<usize, SessionError> {
        let reply = self.run(
            "admin",
            "var count = db.getSiblingDB(\"admin\").system.users.count(); \
             print(JSON.stringify({ok: 1, count: count}));",
        )?;
        reply
            .get("count")
            .and_then(Value::as_u64)
            .and_then(|count| usize::try_from(count).ok())
            .ok_or_else(|| SessionError::Output {
                output: reply.to_string(),
            })
    }

    fn upsert_user(
        &mut self,
        database: &str,
        user: &str,
        password: &str,
        roles: &[&str],
    ) -> Result<(), SessionError> {
        let body = format!(
            "var target = db.getSiblingDB({db}); \
             var spec = {{pwd: {pwd}, roles: {roles}}}; \
             if (target.getUser({user})) {{ target.updateUser({user}, spec); }} \
             else {{ spec.user = {user}; target.createUser(spec); }} \
             print(JSON.stringify({{ok: 1}}));",
            db = js(database),
            pwd = js(password),
            roles = js_list(roles),
            user = js(user),
        );
        self.run(database, &body).map(|_| ())
    }
}

impl StateSession for ShellSession {
    fn initialize_environment(
        &mut self,
        env_type: &str,
        state_servers: &[String],
    ) -> Result<(), SessionError> {
        let body = format!(
            "var state = db.getSiblingDB({db}); \
             state.environments.update({{_id: \"environment\"}}, \
             {{_id: \"environment\", type: {env_type}, \"state-servers\": {servers}}}, \
             {{upsert: true}}); \
             print(JSON.stringify({{ok: 1}}));",
            db = js(STATE_DATABASE),
            env_type = js(env_type),
            servers = js_list(state_servers),
        );
        self.run(STATE_DATABASE, &body).map(|_| ())
    }

    fn add_machine(&mut self, jobs: &[&str]) -> Result<String, SessionError> {
        let body = format!(
            "var state = db.getSiblingDB({db}); \
             var id = String(state.machines.count()); \
             state.machines.insert({{_id: id, jobs: {jobs}}}); \
             print(JSON.stringify({{ok: 1, id: id}}));",
            db = js(STATE_DATABASE),
            jobs = js_list(jobs),
        );
        let reply = self.run(STATE_DATABASE, &body)?;
        reply
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| SessionError::Output {
                output: reply.to_string(),
            })
    }

    fn set_instance_id(&mut self, machine: &str, instance_id: &str) -> Result<(), SessionError> {
        let body = format!(
            "var state = db.getSiblingDB({db}); \
             var result = state.machines.update({{_id: {machine}}}, \
             {{$set: {{\"instance-id\": {instance}}}}}); \
             if (result.nMatched === 0) {{ throw \"machine \" + {machine} + \" not found\"; }} \
             print(JSON.stringify({{ok: 1}}));",
            db = js(STATE_DATABASE),
            machine = js(machine),
            instance = js(instance_id),
        );
        self.run(STATE_DATABASE, &body).map(|_| ())
    }
}
