use super::session::{BrowserSession, ClearMode, Locator, SessionFactory};
use crate::chromedriver_manager::ChromeDriverManager;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thirtyfour::prelude::*;
use tokio::time::{sleep, Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const CONNECT_ATTEMPTS: u32 = 3;

/// A Chrome instance driven through ChromeDriver.
pub struct BrowserDriver {
    driver: WebDriver,
}

impl BrowserDriver {
    pub async fn new(port: u16, download_dir: &Path, headless: bool) -> Result<Self> {
        tracing::debug!("Creating browser session (headless={})", headless);

        let mut caps = DesiredCapabilities::chrome();

        let mut chrome_args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--window-size=1920,1080".to_string(),
        ];

        if headless {
            chrome_args.push("--headless=new".to_string());
        }

        for arg in &chrome_args {
            caps.add_arg(arg)?;
        }

        caps.add_experimental_option(
            "prefs",
            serde_json::json!({
                "download.default_directory": download_dir.to_string_lossy(),
                "download.prompt_for_download": false,
                "download.directory_upgrade": true,
                "safebrowsing.enabled": true,
            }),
        )?;

        let url = format!("http://localhost:{}", port);
        let mut last_error = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match WebDriver::new(&url, caps.clone()).await {
                Ok(driver) => {
                    tracing::debug!("Connected to ChromeDriver on attempt {}", attempt);
                    return Ok(Self { driver });
                }
                Err(e) => {
                    tracing::warn!("ChromeDriver connection attempt {}/{} failed: {}", attempt, CONNECT_ATTEMPTS, e);
                    last_error = Some(e);
                    if attempt < CONNECT_ATTEMPTS {
                        sleep(Duration::from_millis(1000)).await;
                    }
                }
            }
        }

        match last_error {
            Some(e) => Err(e).with_context(|| {
                format!("Failed to connect to ChromeDriver on port {} after {} attempts", port, CONNECT_ATTEMPTS)
            }),
            None => Err(anyhow::anyhow!("No connection attempt was made")),
        }
    }

    fn by(locator: &Locator) -> By {
        match locator {
            Locator::Id(id) => By::Id(*id),
            Locator::Name(name) => By::Name(*name),
        }
    }

    async fn find(&self, locator: &Locator) -> Result<WebElement> {
        self.driver
            .find(Self::by(locator))
            .await
            .with_context(|| format!("Element {} not found", locator))
    }

    async fn script_on(&self, script: &str, element: &WebElement) -> Result<()> {
        self.driver.execute(script, vec![element.to_json()?]).await?;
        Ok(())
    }

    async fn rows(&self, table: &Locator) -> Result<Vec<WebElement>> {
        let table = self.find(table).await?;
        let mut rows = table.find_all(By::Tag("tr")).await?;
        if !rows.is_empty() {
            rows.remove(0);
        }
        Ok(rows)
    }
}

#[async_trait]
impl BrowserSession for BrowserDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.driver.goto(url).await?;
        Ok(())
    }

    async fn wait_for_element(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        let start = Instant::now();

        loop {
            if self.driver.find(Self::by(locator)).await.is_ok() {
                return Ok(());
            }

            if start.elapsed() > timeout {
                return Err(anyhow::anyhow!("Timeout waiting for element {}", locator));
            }

            sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_clickable(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        let start = Instant::now();

        loop {
            if let Ok(element) = self.driver.find(Self::by(locator)).await {
                if element.is_clickable().await.unwrap_or(false) {
                    return Ok(());
                }
            }

            if start.elapsed() > timeout {
                return Err(anyhow::anyhow!("Timeout waiting for {} to become clickable", locator));
            }

            sleep(POLL_INTERVAL).await;
        }
    }

    async fn fill(&self, locator: &Locator, text: &str, clear: ClearMode) -> Result<()> {
        let element = self.find(locator).await?;
        match clear {
            ClearMode::Keep => {}
            ClearMode::Native => element.clear().await?,
            ClearMode::Script => self.script_on("arguments[0].value = '';", &element).await?,
        }
        element.send_keys(text).await?;
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let element = self.find(locator).await?;
        self.script_on("arguments[0].click();", &element).await
    }

    async fn send_keystroke(&self, keys: &str) -> Result<()> {
        self.driver.action_chain().send_keys(keys).perform().await?;
        Ok(())
    }

    async fn switch_to_latest_window(&self) -> Result<()> {
        let handles = self.driver.windows().await?;
        let latest = handles
            .into_iter()
            .last()
            .ok_or_else(|| anyhow::anyhow!("Browser has no open windows"))?;
        self.driver.switch_to_window(latest).await?;
        Ok(())
    }

    async fn table_first_cells(&self, table: &Locator) -> Result<Vec<String>> {
        let mut cells = Vec::new();
        for row in self.rows(table).await? {
            let cell = row.find(By::Tag("td")).await?;
            cells.push(cell.text().await?.trim().to_string());
        }
        Ok(cells)
    }

    async fn click_row_link(&self, table: &Locator, row: usize) -> Result<()> {
        let rows = self.rows(table).await?;
        let target = rows
            .get(row)
            .ok_or_else(|| anyhow::anyhow!("Row {} not present in {}", row, table))?;
        let link = target
            .find(By::Tag("u"))
            .await
            .context("Download link not found in row")?;
        self.script_on("arguments[0].click();", &link).await
    }

    async fn quit(&self) -> Result<()> {
        self.driver.clone().quit().await?;
        Ok(())
    }
}

/// Starts ChromeDriver on demand and opens one browser per period.
pub struct ChromeSessionFactory {
    manager: Arc<ChromeDriverManager>,
    download_dir: PathBuf,
    headless: bool,
}

impl ChromeSessionFactory {
    pub fn new(manager: Arc<ChromeDriverManager>, download_dir: PathBuf, headless: bool) -> Self {
        Self {
            manager,
            download_dir,
            headless,
        }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open(&self) -> Result<Box<dyn BrowserSession>> {
        self.manager.start_driver().await?;
        let browser = BrowserDriver::new(self.manager.port(), &self.download_dir, self.headless).await?;
        Ok(Box::new(browser))
    }

    async fn release(&self) -> Result<()> {
        self.manager.stop_driver().await
    }
}
