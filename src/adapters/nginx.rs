//! nginx frontend: configuration rendering, directory sync and the supervised
//! proxy process.
use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::{
    fs,
    process::{Child, Command},
    sync::Mutex,
};

use crate::{
    core::route::Route,
    ports::frontend::{Frontend, FrontendError, FrontendResult},
};

/// Directory under the config dir where a sync stages its files.
const STAGING_DIR: &str = ".quay-staging";

/// Launch settings for the proxy process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NginxOptions {
    pub command: String,
    pub args: Vec<String>,
    pub config_dir: PathBuf,
}

impl Default for NginxOptions {
    fn default() -> Self {
        Self {
            command: "nginx".to_string(),
            args: vec!["-g".to_string(), "daemon off;".to_string()],
            config_dir: PathBuf::from("/etc/nginx/conf.d"),
        }
    }
}

/// Pure rendering of routes into nginx `server`/`upstream` blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigRenderer;

impl ConfigRenderer {
    /// Stable identifier derived from the route name: the first 16 hex
    /// characters of its SHA-1 digest.
    pub fn config_id(name: &str) -> String {
        let digest = Sha1::digest(name.as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(16);
        id
    }

    /// File name the route's configuration is written under.
    pub fn file_name(name: &str) -> String {
        format!("{}.conf", Self::config_id(name))
    }

    pub fn render(route: &Route) -> String {
        let id = Self::config_id(&route.name);
        let mut out = String::with_capacity(512);

        // Writing into a String cannot fail.
        let _ = write!(
            out,
            "\
server {{
  listen {port};
  root /var/www/html;
  index index.html;

  server_name {server_name};

  location / {{
    proxy_pass_header Server;
    proxy_set_header Host $http_host;
    proxy_redirect off;
    proxy_set_header X-Real-IP $remote_addr;
    proxy_set_header X-Scheme $scheme;
    proxy_pass http://be{id};
  }}
}}

upstream be{id} {{
",
            port = route.port,
            server_name = route.hosts.join(" "),
        );
        for backend in &route.backends {
            let _ = writeln!(out, "  server {backend};");
        }
        out.push_str("}\n");
        out
    }
}

/// Outcome of a directory sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files now present, in route order.
    pub written: Vec<PathBuf>,
    /// Number of previously generated files deleted.
    pub removed: usize,
}

/// Rewrites a config directory so it holds exactly one file per routable
/// route. No process is involved, so this also serves as a file-only frontend
/// when the proxy is supervised elsewhere.
#[derive(Debug, Clone)]
pub struct ConfigWriter {
    config_dir: PathBuf,
}

impl ConfigWriter {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Stage every rendered file, delete the old `*.conf` files, then move
    /// the staged files into place. The first failure aborts the sync.
    pub async fn sync(&self, routes: &[Route]) -> FrontendResult<SyncReport> {
        let staging = self.config_dir.join(STAGING_DIR);
        if fs::try_exists(&staging).await.unwrap_or(false) {
            fs::remove_dir_all(&staging)
                .await
                .map_err(|e| FrontendError::io(&staging, e))?;
        }
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| FrontendError::io(&staging, e))?;

        let mut staged = Vec::new();
        for route in routes.iter().filter(|r| r.is_routable()) {
            let file_name = ConfigRenderer::file_name(&route.name);
            let path = staging.join(&file_name);
            fs::write(&path, ConfigRenderer::render(route))
                .await
                .map_err(|e| FrontendError::io(&path, e))?;
            staged.push(file_name);
        }

        let removed = self.remove_generated().await?;

        let mut written = Vec::with_capacity(staged.len());
        for file_name in staged {
            let from = staging.join(&file_name);
            let to = self.config_dir.join(&file_name);
            fs::rename(&from, &to)
                .await
                .map_err(|e| FrontendError::io(&to, e))?;
            written.push(to);
        }

        fs::remove_dir(&staging)
            .await
            .map_err(|e| FrontendError::io(&staging, e))?;

        tracing::info!(
            config_dir = %self.config_dir.display(),
            written = written.len(),
            removed,
            "Frontend configuration synced"
        );
        Ok(SyncReport { written, removed })
    }

    async fn remove_generated(&self) -> FrontendResult<usize> {
        let dir = &self.config_dir;
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| FrontendError::io(dir, e))?;

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FrontendError::io(dir, e))?
        {
            let path = entry.path();
            let is_conf = path.extension().is_some_and(|ext| ext == "conf");
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| FrontendError::io(&path, e))?
                .is_file();
            if is_conf && is_file {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| FrontendError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl Frontend for ConfigWriter {
    async fn update(&self, routes: &[Route]) -> FrontendResult<()> {
        self.sync(routes).await.map(|_| ())
    }
}

/// A running nginx master process plus the directory it includes.
#[derive(Debug)]
pub struct NginxFrontend {
    writer: ConfigWriter,
    command: String,
    pid: u32,
    child: Mutex<Child>,
}

impl NginxFrontend {
    /// Launch the proxy in the foreground with inherited stdout/stderr.
    /// Dropping the handle without `stop` kills the process.
    pub fn start(options: NginxOptions) -> FrontendResult<Self> {
        let child = Command::new(&options.command)
            .args(&options.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FrontendError::Spawn {
                command: options.command.clone(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| {
            FrontendError::Signal(format!("'{}' exited during startup", options.command))
        })?;

        tracing::info!(command = %options.command, pid, "Frontend process started");

        Ok(Self {
            writer: ConfigWriter::new(options.config_dir),
            command: options.command,
            pid,
            child: Mutex::new(child),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn writer(&self) -> &ConfigWriter {
        &self.writer
    }

    /// Ask the proxy to re-read its configuration. Fails if the process
    /// has already exited.
    pub async fn reload(&self) -> FrontendResult<()> {
        let mut child = self.child.lock().await;
        if let Some(status) = child
            .try_wait()
            .map_err(|e| FrontendError::Signal(e.to_string()))?
        {
            return Err(FrontendError::Signal(format!(
                "'{}' is not running ({status})",
                self.command
            )));
        }

        tracing::debug!(pid = self.pid, "Sending SIGHUP to frontend");
        self.send(ProcessSignal::Reload)
    }

    /// Ask the proxy to finish in-flight requests and exit, then reap it.
    pub async fn stop(&self) -> FrontendResult<ExitStatus> {
        let mut child = self.child.lock().await;
        if let Some(status) = child
            .try_wait()
            .map_err(|e| FrontendError::Signal(e.to_string()))?
        {
            return Ok(status);
        }

        if let Err(e) = self.send(ProcessSignal::Quit) {
            tracing::warn!(error = %e, "Graceful stop failed, killing frontend");
            child
                .start_kill()
                .map_err(|e| FrontendError::Signal(e.to_string()))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| FrontendError::Signal(e.to_string()))?;
        tracing::info!(command = %self.command, %status, "Frontend process exited");
        Ok(status)
    }

    #[cfg(unix)]
    fn send(&self, kind: ProcessSignal) -> FrontendResult<()> {
        use nix::{
            sys::signal::{Signal, kill},
            unistd::Pid,
        };

        let pid = i32::try_from(self.pid)
            .map_err(|_| FrontendError::Signal(format!("pid {} out of range", self.pid)))?;
        let signal = match kind {
            ProcessSignal::Reload => Signal::SIGHUP,
            ProcessSignal::Quit => Signal::SIGQUIT,
        };
        kill(Pid::from_raw(pid), signal).map_err(|e| FrontendError::Signal(e.to_string()))
    }

    #[cfg(not(unix))]
    fn send(&self, _kind: ProcessSignal) -> FrontendResult<()> {
        Err(FrontendError::Signal(
            "signals are unsupported on this platform".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Copy)]
enum ProcessSignal {
    Reload,
    Quit,
}

#[async_trait]
impl Frontend for NginxFrontend {
    async fn update(&self, routes: &[Route]) -> FrontendResult<()> {
        self.writer.sync(routes).await?;
        self.reload().await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn svc(backends: &[&str]) -> Route {
        Route::new("svc", 80, vec!["a.example.com".to_string()])
            .with_backends(backends.iter().map(|b| b.to_string()).collect())
    }

    async fn conf_files(dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "conf") {
                files.push(path);
            }
        }
        files.sort();
        files
    }

    #[test]
    fn test_config_id_is_sha1_prefix() {
        assert_eq!(ConfigRenderer::config_id("svc"), "a0089182becd9217");
        assert_eq!(ConfigRenderer::file_name("svc"), "a0089182becd9217.conf");
    }

    #[test]
    fn test_render_lists_backends_in_order() {
        let mut route = svc(&["10.0.0.1:9000", "10.0.0.2:9000"]);
        route.hosts.push("b.example.com".to_string());
        let conf = ConfigRenderer::render(&route);

        assert!(conf.contains("listen 80;"));
        assert!(conf.contains("server_name a.example.com b.example.com;"));
        assert!(conf.contains("proxy_pass http://bea0089182becd9217;"));
        assert!(conf.contains("upstream bea0089182becd9217 {"));

        let first = conf.find("server 10.0.0.1:9000;").unwrap();
        let second = conf.find("server 10.0.0.2:9000;").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_sync_skips_routes_without_backends() {
        let dir = TempDir::new().unwrap();
        let writer = ConfigWriter::new(dir.path());

        let mut other = svc(&["10.0.0.3:80"]);
        other.name = "other".to_string();
        let routes = vec![svc(&[]), other];

        let report = writer.sync(&routes).await.unwrap();
        assert_eq!(report.written.len(), 1);
        assert_eq!(
            conf_files(dir.path()).await,
            vec![dir.path().join(ConfigRenderer::file_name("other"))]
        );
        assert!(!dir.path().join(STAGING_DIR).exists());
    }

    #[tokio::test]
    async fn test_sync_is_idempotent_and_removes_stale_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("stale.conf"), "server {}").await.unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").await.unwrap();
        let writer = ConfigWriter::new(dir.path());
        let routes = vec![svc(&["10.0.0.1:9000"])];

        let first = writer.sync(&routes).await.unwrap();
        assert_eq!(first.removed, 1);
        let contents = fs::read_to_string(&first.written[0]).await.unwrap();

        let second = writer.sync(&routes).await.unwrap();
        assert_eq!(second.removed, 1);
        assert_eq!(second.written, first.written);
        assert_eq!(fs::read_to_string(&second.written[0]).await.unwrap(), contents);

        assert_eq!(conf_files(dir.path()).await.len(), 1);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_backends_appear_after_update() {
        let dir = TempDir::new().unwrap();
        let writer = ConfigWriter::new(dir.path());

        writer.update(&[svc(&[])]).await.unwrap();
        assert!(conf_files(dir.path()).await.is_empty());

        writer
            .update(&[svc(&["10.0.0.1:9000", "10.0.0.2:9000"])])
            .await
            .unwrap();
        let files = conf_files(dir.path()).await;
        assert_eq!(files.len(), 1);

        let conf = fs::read_to_string(&files[0]).await.unwrap();
        assert!(conf.contains("listen 80;"));
        assert!(conf.contains("server_name a.example.com;"));
        assert!(conf.contains("server 10.0.0.1:9000;\n  server 10.0.0.2:9000;"));
    }

    #[tokio::test]
    async fn test_sync_into_non_directory_fails() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain-file");
        fs::write(&file, "").await.unwrap();

        let writer = ConfigWriter::new(&file);
        let err = writer.sync(&[svc(&["10.0.0.1:1"])]).await.unwrap_err();
        assert!(matches!(err, FrontendError::Io { .. }));
    }

    #[tokio::test]
    async fn test_start_reports_spawn_failure() {
        let options = NginxOptions {
            command: "/nonexistent/quay-test-nginx".to_string(),
            ..NginxOptions::default()
        };
        let err = NginxFrontend::start(options).unwrap_err();
        assert!(matches!(err, FrontendError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_update_and_stop_process() {
        let dir = TempDir::new().unwrap();
        let frontend = NginxFrontend::start(NginxOptions {
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
            config_dir: dir.path().to_path_buf(),
        })
        .unwrap();
        assert!(frontend.pid() > 0);

        frontend.update(&[svc(&["10.0.0.1:9000"])]).await.unwrap();
        assert_eq!(conf_files(dir.path()).await.len(), 1);

        let status = frontend.stop().await.unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_update_fails_once_process_has_exited() {
        let dir = TempDir::new().unwrap();
        let frontend = NginxFrontend::start(NginxOptions {
            command: "true".to_string(),
            args: Vec::new(),
            config_dir: dir.path().to_path_buf(),
        })
        .unwrap();

        let mut result = Ok(());
        for _ in 0..100 {
            result = frontend.update(&[svc(&["10.0.0.1:9000"])]).await;
            if result.is_err() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let err = result.unwrap_err();
        assert!(matches!(err, FrontendError::Signal(_)));
        assert!(err.to_string().contains("not running"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropping_handle_kills_process() {
        let dir = TempDir::new().unwrap();
        let frontend = NginxFrontend::start(NginxOptions {
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
            config_dir: dir.path().to_path_buf(),
        })
        .unwrap();
        let stat = format!("/proc/{}/stat", frontend.pid());
        drop(frontend);

        // Gone, or a zombie waiting to be reaped.
        let mut running = true;
        for _ in 0..100 {
            running = match std::fs::read_to_string(&stat) {
                Ok(line) => !line
                    .rsplit_once(')')
                    .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
                Err(_) => false,
            };
            if !running {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(!running);
    }
}
