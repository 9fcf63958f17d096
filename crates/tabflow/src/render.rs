use tabflow_flow::RunResult;
use tabflow_frame::Table;
use tabled::builder::Builder;
use tabled::settings::Style;
use tabled::Tabled;

#[derive(Tabled)]
struct TaskRow {
    task: String,
    state: String,
    source: String,
    fingerprint: String,
    ms: u128,
    error: String,
}

/// One line per task that took part in `run`.
pub fn run_report(run: &RunResult) -> String {
    let rows = run.tasks.values().map(|report| TaskRow {
        task: report.id.to_string(),
        state: report.state.to_string(),
        source: report.source.map(|s| s.to_string()).unwrap_or_default(),
        fingerprint: report.fingerprint.as_ref().map(|fp| fp.short()).unwrap_or_default(),
        ms: report.elapsed.as_millis(),
        error: report.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
    });
    tabled::Table::new(rows).with(Style::psql()).to_string()
}

/// At most `limit` rows of `table`.
pub fn table(table: &Table, limit: usize) -> String {
    let mut builder = Builder::default();
    builder.push_record(table.schema().names());
    for row in table.rows().iter().take(limit) {
        builder.push_record(row.iter().map(|v| v.to_string()));
    }
    let mut out = builder.build().with(Style::psql()).to_string();
    if table.num_rows() > limit {
        out.push_str(&format!("\n({} of {} rows)", limit, table.num_rows()));
    }
    out
}
