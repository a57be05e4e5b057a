//! `gosuki start`: the foreground service.

use crate::Result;
use crate::config::Config;
use crate::daemon;

pub fn execute(config: &Config) -> Result<()> {
    daemon::run(config)
}
