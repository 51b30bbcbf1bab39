use crate::errors::TraceError;
use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Line-oriented conversation with a long-lived child, used for request/response
/// protocols such as the debugger machine interface.
pub trait LineSession {
    fn send_line(&mut self, line: &str) -> Result<(), TraceError>;
    /// `Ok(None)` means the peer closed its output.
    fn read_line(&mut self) -> Result<Option<String>, TraceError>;
}

pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, TraceError>;
    /// Waits for `handle` to exit, handing each output line to the callbacks as
    /// it arrives.
    fn wait_with_line_stream(
        &self,
        handle: u64,
        on_stdout_line: &mut dyn FnMut(&str),
        on_stderr_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessOutput, TraceError>;
    fn open_session(&self, request: ProcessRequest) -> Result<Box<dyn LineSession>, TraceError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, TraceError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TraceError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), TraceError>;
    fn exists(&self, path: &Path) -> bool;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, TraceError> {
        std::fs::read_to_string(path)
            .map_err(|e| TraceError::Io(format!("{}: {e}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TraceError> {
        std::fs::write(path, contents).map_err(|e| TraceError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), TraceError> {
        std::fs::create_dir_all(path).map_err(|e| TraceError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[derive(Default)]
struct ProcessState {
    next_handle: u64,
    children: HashMap<u64, Child>,
}

pub struct ProductionProcessRunner {
    state: Mutex<ProcessState>,
}

impl ProductionProcessRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProcessState::default()),
        }
    }

    fn take_child(&self, handle: u64) -> Result<Child, TraceError> {
        let child = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| TraceError::Process("process table lock poisoned".to_string()))?;
            state.children.remove(&handle)
        };
        child.ok_or_else(|| TraceError::Process(format!("unknown handle {handle}")))
    }
}

impl Default for ProductionProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn command_for(request: &ProcessRequest) -> std::process::Command {
    let mut cmd = std::process::Command::new(&request.program);
    cmd.args(&request.args);
    if let Some(cwd) = &request.cwd {
        cmd.current_dir(cwd);
    }
    cmd
}

impl ProcessRunner for ProductionProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, TraceError> {
        let mut cmd = command_for(&request);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| TraceError::Process(format!("{}: {e}", request.program)))?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| TraceError::Process("process table lock poisoned".to_string()))?;
        let handle = state.next_handle;
        state.next_handle += 1;
        state.children.insert(handle, child);
        Ok(handle)
    }

    fn open_session(&self, request: ProcessRequest) -> Result<Box<dyn LineSession>, TraceError> {
        let mut cmd = command_for(&request);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd
            .spawn()
            .map_err(|e| TraceError::Process(format!("{}: {e}", request.program)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TraceError::Process("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TraceError::Process("child stdout unavailable".to_string()))?;
        Ok(Box::new(ChildSession {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        }))
    }

    fn wait_with_line_stream(
        &self,
        handle: u64,
        on_stdout_line: &mut dyn FnMut(&str),
        on_stderr_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessOutput, TraceError> {
        let mut child = self.take_child(handle)?;

        // stderr is drained on a helper thread so a chatty child cannot block on a full pipe.
        let stderr = child.stderr.take();
        let stderr_reader = std::thread::spawn(move || {
            let mut lines = Vec::new();
            if let Some(stderr) = stderr {
                for line in BufReader::new(stderr).lines() {
                    match line {
                        Ok(line) => lines.push(line),
                        Err(_) => break,
                    }
                }
            }
            lines
        });

        let mut stdout_text = String::new();
        let mut read_error = None;
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(line) => {
                        on_stdout_line(&line);
                        stdout_text.push_str(&line);
                        stdout_text.push('\n');
                    }
                    Err(err) => {
                        read_error = Some(err);
                        let _ = child.kill();
                        break;
                    }
                }
            }
        }

        let status = child
            .wait()
            .map_err(|e| TraceError::Process(e.to_string()))?;
        let stderr_lines = stderr_reader
            .join()
            .map_err(|_| TraceError::Process("stderr reader panicked".to_string()))?;
        if let Some(err) = read_error {
            return Err(TraceError::Io(format!("reading child stdout: {err}")));
        }
        for line in &stderr_lines {
            on_stderr_line(line);
        }

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout_text,
            stderr: stderr_lines.join("\n"),
        })
    }
}

struct ChildSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl LineSession for ChildSession {
    fn send_line(&mut self, line: &str) -> Result<(), TraceError> {
        writeln!(self.stdin, "{line}").map_err(|e| TraceError::Io(e.to_string()))?;
        self.stdin
            .flush()
            .map_err(|e| TraceError::Io(e.to_string()))
    }

    fn read_line(&mut self) -> Result<Option<String>, TraceError> {
        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .map_err(|e| TraceError::Io(e.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

impl Drop for ChildSession {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub struct ProductionRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner::new()),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<TraceError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
        fs
    }

    pub fn set_fail_next(&self, error: TraceError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().expect("dirs lock").clone()
    }

    fn maybe_fail(&self) -> Result<(), TraceError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, TraceError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| TraceError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TraceError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), TraceError> {
        self.maybe_fail()?;
        self.dirs
            .lock()
            .expect("dirs lock")
            .push(path.to_path_buf());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
    }
}

/// Scripted peer: every line sent releases the next queued reply batch.
#[derive(Default, Clone)]
pub struct FakeLineSession {
    replies: Arc<Mutex<VecDeque<Vec<String>>>>,
    pending: Arc<Mutex<VecDeque<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl FakeLineSession {
    pub fn push_reply(&self, lines: &[&str]) {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(lines.iter().map(|line| line.to_string()).collect());
    }

    /// Lines readable before any command is sent, such as a startup banner.
    pub fn push_banner(&self, lines: &[&str]) {
        self.pending
            .lock()
            .expect("pending lock")
            .extend(lines.iter().map(|line| line.to_string()));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }
}

impl LineSession for FakeLineSession {
    fn send_line(&mut self, line: &str) -> Result<(), TraceError> {
        self.sent.lock().expect("sent lock").push(line.to_string());
        if let Some(reply) = self.replies.lock().expect("replies lock").pop_front() {
            self.pending.lock().expect("pending lock").extend(reply);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, TraceError> {
        Ok(self.pending.lock().expect("pending lock").pop_front())
    }
}

#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<Vec<Result<ProcessOutput, TraceError>>>>,
    sessions: Arc<Mutex<VecDeque<FakeLineSession>>>,
    spawned: Arc<Mutex<Vec<ProcessRequest>>>,
    waits: Arc<Mutex<Vec<u64>>>,
    next_handle: Arc<Mutex<u64>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, TraceError>) {
        self.responses.lock().expect("responses lock").push(output);
    }

    pub fn push_session(&self, session: FakeLineSession) {
        self.sessions
            .lock()
            .expect("sessions lock")
            .push_back(session);
    }

    pub fn spawned(&self) -> Vec<ProcessRequest> {
        self.spawned.lock().expect("spawned lock").clone()
    }

    pub fn waits(&self) -> Vec<u64> {
        self.waits.lock().expect("waits lock").clone()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, TraceError> {
        self.spawned.lock().expect("spawned lock").push(request);
        let mut next = self.next_handle.lock().expect("next lock");
        let handle = *next;
        *next += 1;
        Ok(handle)
    }

    /// Replays the next queued response as if its output had been streamed.
    fn wait_with_line_stream(
        &self,
        handle: u64,
        on_stdout_line: &mut dyn FnMut(&str),
        on_stderr_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessOutput, TraceError> {
        self.waits.lock().expect("waits lock").push(handle);
        let output = {
            let mut responses = self.responses.lock().expect("responses lock");
            if responses.is_empty() {
                return Err(TraceError::Process("no fake response queued".to_string()));
            }
            responses.remove(0)?
        };
        for line in output.stdout.lines() {
            on_stdout_line(line);
        }
        for line in output.stderr.lines() {
            on_stderr_line(line);
        }
        Ok(output)
    }

    fn open_session(&self, request: ProcessRequest) -> Result<Box<dyn LineSession>, TraceError> {
        self.spawned.lock().expect("spawned lock").push(request);
        let session = self
            .sessions
            .lock()
            .expect("sessions lock")
            .pop_front()
            .ok_or_else(|| TraceError::Process("no fake session queued".to_string()))?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        FakeFileSystem, FakeLineSession, FakeProcessRunner, FileSystem, ProcessOutput,
        ProcessRequest, ProcessRunner,
    };
    use crate::errors::TraceError;
    use std::path::Path;

    fn request(program: &str) -> ProcessRequest {
        ProcessRequest {
            program: program.to_string(),
            args: vec![],
            cwd: None,
        }
    }

    #[test]
    fn fake_line_stream_splits_buffered_output() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput {
            exit_code: 0,
            stdout: "a\nb\n".to_string(),
            stderr: "warn\n".to_string(),
        }));
        let handle = runner.spawn(request("python3")).expect("spawn");
        let mut out = Vec::new();
        let mut err = Vec::new();
        runner
            .wait_with_line_stream(
                handle,
                &mut |line| out.push(line.to_string()),
                &mut |line| err.push(line.to_string()),
            )
            .expect("wait");
        assert_eq!(out, vec!["a", "b"]);
        assert_eq!(err, vec!["warn"]);
        assert_eq!(runner.waits(), vec![0]);
    }

    #[test]
    fn fake_runner_without_response_fails() {
        let runner = FakeProcessRunner::default();
        let handle = runner.spawn(request("python3")).expect("spawn");
        let err = runner
            .wait_with_line_stream(handle, &mut |_| {}, &mut |_| {})
            .expect_err("must fail");
        assert!(format!("{err}").contains("no fake response queued"));
    }

    #[test]
    fn fake_session_releases_replies_per_command() {
        let session = FakeLineSession::default();
        session.push_banner(&["(gdb)"]);
        session.push_reply(&["1^done", "(gdb)"]);
        let runner = FakeProcessRunner::default();
        runner.push_session(session.clone());

        let mut live = runner.open_session(request("gdb")).expect("session");
        assert_eq!(live.read_line().expect("read"), Some("(gdb)".to_string()));
        assert_eq!(live.read_line().expect("read"), None);
        live.send_line("1-gdb-version").expect("send");
        assert_eq!(live.read_line().expect("read"), Some("1^done".to_string()));
        assert_eq!(session.sent(), vec!["1-gdb-version"]);
    }

    #[test]
    fn fake_file_system_fails_once_when_armed() {
        let fs = FakeFileSystem::with_file("/a.py", "x = 1\n");
        fs.set_fail_next(TraceError::Io("disk gone".to_string()));
        assert!(fs.read_to_string(Path::new("/a.py")).is_err());
        assert_eq!(
            fs.read_to_string(Path::new("/a.py")).expect("second read"),
            "x = 1\n"
        );
    }
}
