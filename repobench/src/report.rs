use std::io::{self, Write};

use tabwriter::TabWriter;

use crate::trial::TrialBatch;

/// Renders one trial batch as an aligned table for the operator console.
pub fn render_batch(batch: &TrialBatch) -> io::Result<String> {
    let mut out = Vec::new();
    let mut tab_writer = TabWriter::new(&mut out);
    writeln!(&mut tab_writer, "SIZE\tTRIAL\tID\tSTATUS\tSECONDS")?;
    for row in &batch.rows {
        writeln!(&mut tab_writer, "{row}")?;
    }
    let failed = batch.rows.iter().filter(|r| r.status != 0).count();
    writeln!(
        &mut tab_writer,
        "# size {} trial {}: {} fetches, {} failed",
        batch.size,
        batch.trial,
        batch.rows.len(),
        failed
    )?;
    tab_writer.flush()?;
    drop(tab_writer);
    String::from_utf8(out).map_err(io::Error::other)
}
