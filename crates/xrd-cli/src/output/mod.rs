//! Terminal output for xrdmux
//!
//! Status lines are colored and prefixed with a symbol; reports are
//! rendered as tables.

use std::io::Write;
use std::time::Duration;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use crate::commands::{PingResult, ProbeReport};

fn print_tagged(out: &mut impl Write, color: Color, symbol: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(symbol),
        Print(" "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Green check on stdout
pub fn print_success(msg: &str) {
    print_tagged(&mut std::io::stdout(), Color::Green, "✓", msg);
}

/// Red cross on stderr
pub fn print_error(msg: &str) {
    print_tagged(&mut std::io::stderr(), Color::Red, "✗", msg);
}

/// Yellow warning sign on stderr
pub fn print_warning(msg: &str) {
    print_tagged(&mut std::io::stderr(), Color::Yellow, "⚠", msg);
}

/// Cyan info sign on stdout
pub fn print_info(msg: &str) {
    print_tagged(&mut std::io::stdout(), Color::Cyan, "ℹ", msg);
}

/// Render what a probe learned about a server as a two-column table
pub fn format_probe(report: &ProbeReport) -> String {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "FIELD")]
        field: &'static str,
        #[tabled(rename = "VALUE")]
        value: String,
    }

    let signed = if report.signed.is_empty() {
        "none".to_string()
    } else {
        report.signed.join(", ")
    };
    let rows = vec![
        Row {
            field: "address",
            value: report.addr.clone(),
        },
        Row {
            field: "server type",
            value: report.server_type.clone(),
        },
        Row {
            field: "login id",
            value: report.login_id.clone(),
        },
        Row {
            field: "protocol",
            value: format!("{:#x}", report.protocol_version),
        },
        Row {
            field: "flags",
            value: format!("{:#010x}", report.flags),
        },
        Row {
            field: "security level",
            value: report.security_level.clone(),
        },
        Row {
            field: "signed requests",
            value: signed,
        },
    ];

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(100))
        .to_string()
}

/// Render ping results, one row per ping
pub fn format_pings(results: &[PingResult]) -> String {
    if results.is_empty() {
        return "No pings sent".to_string();
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "#")]
        seq: usize,
        #[tabled(rename = "RESULT")]
        result: String,
        #[tabled(rename = "TIME")]
        time: String,
    }

    let rows: Vec<Row> = results
        .iter()
        .enumerate()
        .map(|(i, r)| Row {
            seq: i + 1,
            result: r.outcome.clone(),
            time: format_duration(r.elapsed),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Milliseconds with two decimals
pub fn format_duration(d: Duration) -> String {
    format!("{:.2} ms", d.as_secs_f64() * 1000.0)
}
