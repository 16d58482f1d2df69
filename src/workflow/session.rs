use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// How a portal element is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Id(&'static str),
    Name(&'static str),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{}", id),
            Locator::Name(name) => write!(f, "[name={}]", name),
        }
    }
}

/// What to do with a field's current value before typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    Keep,
    /// WebDriver clear.
    Native,
    /// Blank the value from script, for inputs whose handlers swallow a native clear.
    Script,
}

/// One controllable browser instance. Owned by a single run loop iteration.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn wait_for_element(&self, locator: &Locator, timeout: Duration) -> Result<()>;

    async fn wait_for_clickable(&self, locator: &Locator, timeout: Duration) -> Result<()>;

    async fn fill(&self, locator: &Locator, text: &str, clear: ClearMode) -> Result<()>;

    /// Click through script, which also reaches elements covered by overlays.
    async fn click(&self, locator: &Locator) -> Result<()>;

    /// Type into whatever currently has focus.
    async fn send_keystroke(&self, keys: &str) -> Result<()>;

    async fn switch_to_latest_window(&self) -> Result<()>;

    /// Text of the first cell of every data row of a table, header row excluded.
    async fn table_first_cells(&self, table: &Locator) -> Result<Vec<String>>;

    /// Click the download link in data row `row` (0-based, header excluded).
    async fn click_row_link(&self, table: &Locator, row: usize) -> Result<()>;

    async fn quit(&self) -> Result<()>;
}

/// Opens one fresh browser session per period.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>>;

    /// Called once after the last period of a run.
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}
