use std::io::Write;

use ro_core::Result;

pub fn execute(out: &mut dyn Write) -> Result<()> {
    writeln!(out, "rollout {}", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
