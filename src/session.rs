//! Interactive session: a line-oriented stand-in for the entry form.
//!
//! Every line is one user action. The session owns the history for its
//! lifetime and hands it through the pure operations in [`crate::calculator`]
//! and [`crate::import`]; nothing outlives the process.

use std::mem;
use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};

use crate::aggregate::ViewMode;
use crate::calculator::{EntryForm, Unit, result_message, submit};
use crate::config::Settings;
use crate::errors::ExportError;
use crate::export::{ChartExporter, ExportRequest, ExportSlot, Exporter, PdfExporter};
use crate::history::History;
use crate::import::import_path;
use crate::output::{OutputFormat, render_view};
use crate::report::compose;

pub const HELP: &str = "\
comandos:
  add area=<ha> quantidade=<n> [unidade=sacas|kg] [lote=<nome>] [cultivar=<nome>]
  import <arquivo.csv>
  view by-plot|by-cultivar
  list [pretty|json|csv]
  report
  export-chart | export-pdf
  wait
  cancel chart|pdf
  help
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add(EntryForm),
    Import(PathBuf),
    View(ViewMode),
    List(OutputFormat),
    Report,
    ExportChart,
    ExportPdf,
    Wait,
    Cancel(ExportKind),
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Chart,
    Pdf,
}

impl Command {
    /// Parses one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let tokens = split_args(line)?;
        let Some((name, args)) = tokens.split_first() else {
            return Ok(None);
        };

        let command = match name.to_lowercase().as_str() {
            "add" | "calcular" => Command::Add(parse_form(args)?),
            "import" => match args {
                [path] => Command::Import(PathBuf::from(path)),
                _ => return Err("uso: import <arquivo.csv>".to_string()),
            },
            "view" => match args {
                [mode] => Command::View(mode.parse()?),
                _ => return Err("uso: view by-plot|by-cultivar".to_string()),
            },
            "list" => match args {
                [] => Command::List(OutputFormat::Pretty),
                [format] => Command::List(format.parse()?),
                _ => return Err("uso: list [pretty|json|csv]".to_string()),
            },
            "report" => Command::Report,
            "export-chart" => Command::ExportChart,
            "export-pdf" => Command::ExportPdf,
            "wait" => Command::Wait,
            "cancel" => match args {
                [kind] if kind == "chart" => Command::Cancel(ExportKind::Chart),
                [kind] if kind == "pdf" => Command::Cancel(ExportKind::Pdf),
                _ => return Err("uso: cancel chart|pdf".to_string()),
            },
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("comando desconhecido: {other}")),
        };
        Ok(Some(command))
    }
}

/// Parses `area=.. quantidade=.. [unidade=..] [lote=..] [cultivar=..]`.
pub fn parse_form_line(line: &str) -> Result<EntryForm, String> {
    parse_form(&split_args(line)?)
}

fn parse_form(args: &[String]) -> Result<EntryForm, String> {
    let mut form = EntryForm::default();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| format!("argumento inválido '{arg}' (esperado chave=valor)"))?;
        match key {
            "area" => form.area = value.to_string(),
            "quantidade" | "quantity" => form.quantity = value.to_string(),
            "unidade" | "unit" => form.unit = value.parse::<Unit>()?,
            "lote" | "nomeLote" | "label" => form.label = Some(value.to_string()),
            "cultivar" => form.cultivar = Some(value.to_string()),
            other => return Err(format!("campo desconhecido: {other}")),
        }
    }
    Ok(form)
}

/// Splits a line on whitespace, keeping double-quoted runs together.
pub fn split_args(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if in_quotes {
        return Err("aspas sem fechamento".to_string());
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// What the loop should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue(String),
    Quit(String),
}

impl Step {
    pub fn text(&self) -> &str {
        match self {
            Step::Continue(text) | Step::Quit(text) => text,
        }
    }
}

pub struct Session {
    history: History,
    mode: ViewMode,
    settings: Settings,
    chart: ExportSlot<ChartExporter>,
    pdf: ExportSlot<PdfExporter>,
}

impl Session {
    pub fn new(settings: Settings) -> Self {
        let chart = ExportSlot::new(ChartExporter {
            size: settings.chart_size,
        });
        let pdf = ExportSlot::new(PdfExporter {
            chart_size: settings.chart_size,
        });
        Self {
            history: History::new(),
            mode: ViewMode::ByPlot,
            settings,
            chart,
            pdf,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// Runs one command against the session state.
    pub async fn execute(&mut self, command: Command) -> Step {
        match command {
            Command::Add(form) => {
                let (history, outcome) = submit(mem::take(&mut self.history), &form);
                self.history = history;
                Step::Continue(result_message(&outcome))
            }
            Command::Import(path) => Step::Continue(self.import(path)),
            Command::View(mode) => {
                self.mode = mode;
                Step::Continue(format!("exibindo {mode}"))
            }
            Command::List(format) => match render_view(self.history.records(), self.mode, format) {
                Ok(text) => Step::Continue(text.trim_end().to_string()),
                Err(e) => {
                    error!(error = %e, "Rendering failed");
                    Step::Continue(format!("erro: {e}"))
                }
            },
            Command::Report => match compose(self.history.records()) {
                Ok(report) => Step::Continue(report.to_string().trim_end().to_string()),
                Err(e) => Step::Continue(format!("erro: {e}")),
            },
            Command::ExportChart => {
                let request = self.request();
                Step::Continue(start_export(&mut self.chart, request))
            }
            Command::ExportPdf => {
                let request = self.request();
                Step::Continue(start_export(&mut self.pdf, request))
            }
            Command::Wait => Step::Continue(self.wait_all().await.join("\n")),
            Command::Cancel(ExportKind::Chart) => Step::Continue(cancel_export(&mut self.chart)),
            Command::Cancel(ExportKind::Pdf) => Step::Continue(cancel_export(&mut self.pdf)),
            Command::Help => Step::Continue(HELP.to_string()),
            Command::Quit => {
                let mut lines = self.wait_all().await;
                lines.push(format!("{} registro(s) nesta sessão", self.history.len()));
                Step::Quit(lines.join("\n"))
            }
        }
    }

    fn import(&mut self, path: PathBuf) -> String {
        match import_path(&path, &self.settings.import_options()) {
            Ok(report) => {
                self.history = report.append_to(mem::take(&mut self.history));
                let mut message = format!(
                    "{} registro(s) importado(s), {} linha(s) ignorada(s)",
                    report.groups.len(),
                    report.skipped_count()
                );
                for skipped in &report.skipped {
                    message.push_str(&format!("\n  linha {}: {}", skipped.line, skipped.reason));
                }
                for conflict in &report.conflicts {
                    message.push_str(&format!(
                        "\n  grupo rejeitado ({} / {}): áreas divergentes {:?}",
                        conflict.label.as_deref().unwrap_or("-"),
                        conflict.cultivar.as_deref().unwrap_or("-"),
                        conflict.areas
                    ));
                }
                message
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "CSV import failed");
                format!("erro ao importar {}: {e}", path.display())
            }
        }
    }

    fn request(&self) -> ExportRequest {
        ExportRequest::new(
            self.history.records(),
            self.mode,
            self.settings.output_dir.clone(),
        )
    }

    /// Outcomes of exports that finished since the last call, without blocking.
    pub async fn collect_finished(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.chart.is_ready() {
            lines.extend(finish_line(self.chart.wait().await));
        }
        if self.pdf.is_ready() {
            lines.extend(finish_line(self.pdf.wait().await));
        }
        lines
    }

    async fn wait_all(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.extend(finish_line(self.chart.wait().await));
        lines.extend(finish_line(self.pdf.wait().await));
        lines
    }

    /// Reads commands from `input` until `quit` or end of input.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        info!("Session started");

        loop {
            let Some(line) = lines.next_line().await? else {
                let step = self.execute(Command::Quit).await;
                write_reply(&mut output, step.text()).await?;
                break;
            };

            for done in self.collect_finished().await {
                write_reply(&mut output, &done).await?;
            }

            let command = match Command::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(message) => {
                    write_reply(&mut output, &message).await?;
                    continue;
                }
            };

            match self.execute(command).await {
                Step::Continue(text) => write_reply(&mut output, &text).await?,
                Step::Quit(text) => {
                    write_reply(&mut output, &text).await?;
                    break;
                }
            }
        }

        info!(records = self.history.len(), "Session ended");
        Ok(())
    }
}

fn start_export<E: Exporter>(slot: &mut ExportSlot<E>, request: ExportRequest) -> String {
    match slot.start(request) {
        Ok(()) => format!("exportação {} iniciada", slot.kind()),
        Err(e) => format!("erro: {e}"),
    }
}

fn cancel_export<E: Exporter>(slot: &mut ExportSlot<E>) -> String {
    if slot.cancel() {
        format!("cancelamento da exportação {} solicitado", slot.kind())
    } else {
        format!("nenhuma exportação {} em andamento", slot.kind())
    }
}

fn finish_line(outcome: Option<Result<PathBuf, ExportError>>) -> Option<String> {
    match outcome? {
        Ok(path) => Some(format!("arquivo gerado: {}", path.display())),
        Err(e) => Some(format!("erro: {e}")),
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    output.write_all(text.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VALIDATION_MESSAGE;
    use std::fs;

    fn session() -> Session {
        Session::new(Settings::default())
    }

    async fn run_lines(session: &mut Session, input: &str) -> String {
        let mut output = Vec::new();
        session.run(input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_split_args_keeps_quoted_values() {
        let tokens = split_args(r#"add area=10 lote="Talhão A" cultivar=BRS1010"#).unwrap();
        assert_eq!(tokens, ["add", "area=10", "lote=Talhão A", "cultivar=BRS1010"]);
        assert!(split_args("add lote=\"x").is_err());
        assert!(split_args("   ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_add_command() {
        let command = Command::parse("add area=5 quantidade=300 unidade=kg").unwrap().unwrap();
        assert_eq!(command, Command::Add(EntryForm::new("5", "300", Unit::Kilograms)));
    }

    #[test]
    fn test_parse_form_line() {
        let form = parse_form_line(r#"area=2,5 quantidade=10 lote="Norte 1""#).unwrap();
        assert_eq!(form.area, "2,5");
        assert_eq!(form.label.as_deref(), Some("Norte 1"));
        assert_eq!(form.unit, Unit::Sacks);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse("add area").is_err());
        assert!(Command::parse("add unidade=ton").is_err());
        assert!(Command::parse("view sideways").is_err());
        assert!(Command::parse("fly").is_err());
        assert_eq!(Command::parse("").unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let mut s = session();
        let step = s
            .execute(Command::parse(r#"add area=10 quantidade=550 lote="Talhão A" cultivar=BRS1010"#).unwrap().unwrap())
            .await;

        assert_eq!(step, Step::Continue("Produtividade: 55.00 sacas/ha".to_string()));
        assert_eq!(s.history().records()[0].label, "Talhão A");
    }

    #[tokio::test]
    async fn test_invalid_add_is_not_recorded() {
        let mut s = session();
        let step = s.execute(Command::Add(EntryForm::new("0", "10", Unit::Sacks))).await;

        assert_eq!(step, Step::Continue(VALIDATION_MESSAGE.to_string()));
        assert!(s.history().is_empty());
    }

    #[tokio::test]
    async fn test_report_on_empty_history() {
        let mut s = session();
        let step = s.execute(Command::Report).await;
        assert_eq!(step, Step::Continue("erro: no records to report".to_string()));
    }

    #[tokio::test]
    async fn test_export_with_empty_history_is_refused() {
        let mut s = session();
        let Step::Continue(text) = s.execute(Command::ExportChart).await else {
            panic!("expected continue");
        };
        assert!(text.contains("history is empty"));
    }

    #[tokio::test]
    async fn test_import_appends_records() {
        let path = std::env::temp_dir().join("harvest_yield_test_session.csv");
        fs::write(&path, "area,quantidade,nomeLote,cultivar\n10,100,A,X\n10,50,A,X\n,1,B,Y\n").unwrap();

        let mut s = session();
        let Step::Continue(text) = s.execute(Command::Import(path.clone())).await else {
            panic!("expected continue");
        };

        assert!(text.starts_with("1 registro(s) importado(s), 1 linha(s) ignorada(s)"));
        assert!(text.contains("linha 4"));
        assert_eq!(s.history().records()[0].productivity, 15.0);
        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_import_missing_file() {
        let mut s = session();
        let Step::Continue(text) = s.execute(Command::Import(PathBuf::from("/nonexistent/x.csv"))).await
        else {
            panic!("expected continue");
        };
        assert!(text.starts_with("erro ao importar"));
    }

    #[tokio::test]
    async fn test_run_loop_by_cultivar() {
        let mut s = session();
        let out = run_lines(
            &mut s,
            "add area=1 quantidade=10 cultivar=A\n\
             add area=1 quantidade=30 cultivar=A\n\
             add area=x quantidade=1\n\
             view by-cultivar\n\
             list csv\n\
             quit\n\
             add area=1 quantidade=1\n",
        )
        .await;

        assert!(out.contains("Produtividade: 10.00 sacas/ha"));
        assert!(out.contains(VALIDATION_MESSAGE));
        assert!(out.contains("A,20.00,2"));
        assert!(out.contains("2 registro(s) nesta sessão"));
        assert_eq!(s.mode(), ViewMode::ByCultivar);
        assert_eq!(s.history().len(), 2);
    }

    #[tokio::test]
    async fn test_run_loop_ends_on_eof() {
        let mut s = session();
        let out = run_lines(&mut s, "bogus\nadd area=2 quantidade=10\n").await;

        assert!(out.contains("comando desconhecido: bogus"));
        assert!(out.contains("Produtividade: 5.00 sacas/ha"));
        assert!(out.contains("1 registro(s) nesta sessão"));
    }
}
