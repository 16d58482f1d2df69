use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use tokio::sync::Mutex;

const READINESS_TIMEOUT_SECS: u64 = 15;
const LATEST_STABLE_URL: &str = "https://googlechromelabs.github.io/chrome-for-testing/LATEST_RELEASE_STABLE";

#[cfg(windows)]
const DRIVER_BINARY: &str = "chromedriver.exe";
#[cfg(not(windows))]
const DRIVER_BINARY: &str = "chromedriver";

/// Chrome-for-Testing platform slug for the host.
fn platform_slug() -> &'static str {
    if cfg!(windows) {
        "win64"
    } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        "mac-arm64"
    } else if cfg!(target_os = "macos") {
        "mac-x64"
    } else {
        "linux64"
    }
}

/// Owns the ChromeDriver process that browser sessions connect to.
pub struct ChromeDriverManager {
    driver_path: PathBuf,
    port: u16,
    process: Arc<Mutex<Option<Child>>>,
}

impl ChromeDriverManager {
    /// Use `explicit_path` if given, otherwise a driver next to the executable.
    pub fn new(port: u16, explicit_path: Option<PathBuf>) -> Self {
        let driver_path = explicit_path.unwrap_or_else(|| {
            let exe_dir = std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("."));
            exe_dir.join(DRIVER_BINARY)
        });

        Self {
            driver_path,
            port,
            process: Arc::new(Mutex::new(None)),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn ensure_driver_available(&self) -> Result<()> {
        if !self.driver_path.exists() {
            tracing::info!("ChromeDriver not found at {:?}, downloading...", self.driver_path);
            self.download_chromedriver()
                .await
                .context("Failed to download ChromeDriver. Please check your internet connection.")?;
        } else {
            tracing::debug!("ChromeDriver found at {:?}", self.driver_path);
        }
        Ok(())
    }

    /// Start the driver unless it is already running. Safe to call before every session.
    pub async fn start_driver(&self) -> Result<()> {
        let mut process_guard = self.process.lock().await;
        if let Some(child) = process_guard.as_mut() {
            match child.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => tracing::warn!("ChromeDriver exited ({}), restarting", status),
                Err(e) => tracing::warn!("Could not query ChromeDriver status: {}", e),
            }
            *process_guard = None;
        }

        self.ensure_driver_available().await?;

        tracing::info!("Starting ChromeDriver on port {}...", self.port);
        let child = Command::new(&self.driver_path)
            .arg(format!("--port={}", self.port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start ChromeDriver from {:?}. Make sure Chrome is installed.", self.driver_path))?;

        *process_guard = Some(child);

        if !self.wait_for_readiness(READINESS_TIMEOUT_SECS).await {
            if let Some(mut child) = process_guard.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
            return Err(anyhow::anyhow!(
                "ChromeDriver failed to become ready within {} seconds",
                READINESS_TIMEOUT_SECS
            ));
        }

        tracing::info!("ChromeDriver ready on port {}", self.port);
        Ok(())
    }

    pub async fn stop_driver(&self) -> Result<()> {
        let mut process_guard = self.process.lock().await;
        if let Some(mut child) = process_guard.take() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::info!("ChromeDriver stopped");
        }
        Ok(())
    }

    async fn download_chromedriver(&self) -> Result<()> {
        let version = self.get_latest_version().await?;
        let platform = platform_slug();
        tracing::info!("Downloading ChromeDriver {} for {}", version, platform);

        let download_url = format!(
            "https://storage.googleapis.com/chrome-for-testing-public/{}/{}/chromedriver-{}.zip",
            version, platform, platform
        );

        let response = reqwest::get(&download_url).await?.error_for_status()?;
        let zip_data = response.bytes().await?;

        let zip_path = std::env::temp_dir().join("report455-chromedriver.zip");
        fs::write(&zip_path, &zip_data)?;

        let extracted = self.extract_driver(&zip_path);
        let _ = fs::remove_file(&zip_path);
        extracted?;

        tracing::info!("ChromeDriver downloaded to {:?}", self.driver_path);
        Ok(())
    }

    fn extract_driver(&self, zip_path: &std::path::Path) -> Result<()> {
        let file = fs::File::open(zip_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            // Entries look like `chromedriver-linux64/chromedriver`.
            if name.ends_with(DRIVER_BINARY) && !name.ends_with('/') {
                if let Some(parent) = self.driver_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut outfile = fs::File::create(&self.driver_path)?;
                std::io::copy(&mut entry, &mut outfile)?;
                drop(outfile);
                make_executable(&self.driver_path)?;
                return Ok(());
            }
        }

        Err(anyhow::anyhow!("{} not found in ChromeDriver archive", DRIVER_BINARY))
    }

    async fn wait_for_readiness(&self, timeout_secs: u64) -> bool {
        let client = reqwest::Client::new();
        let url = format!("http://localhost:{}/status", self.port);
        let timeout = tokio::time::Duration::from_secs(timeout_secs);
        let start = tokio::time::Instant::now();

        while start.elapsed() < timeout {
            if let Ok(response) = client.get(&url).send().await {
                if response.status().is_success() {
                    return true;
                }
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
        }

        false
    }

    async fn get_latest_version(&self) -> Result<String> {
        let response = reqwest::get(LATEST_STABLE_URL).await?.error_for_status()?;
        let version = response.text().await?.trim().to_string();
        tracing::debug!("Latest ChromeDriver version: {}", version);
        Ok(version)
    }
}

#[cfg(unix)]
fn make_executable(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

impl Drop for ChromeDriverManager {
    fn drop(&mut self) {
        if let Ok(mut process_guard) = self.process.try_lock() {
            if let Some(mut child) = process_guard.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}
