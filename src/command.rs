use std::io::{BufRead, Write};

use anyhow::Result;
use codemap::CodeMap;
use codemap_diagnostic::{ColorConfig, Diagnostic, Emitter, Level, SpanLabel, SpanStyle};
use rust_sitter::errors::{ParseError, ParseErrorReason};

use crate::eval::ExprError;

#[rust_sitter::grammar("command")]
pub mod grammar {
    #[rust_sitter::language]
    #[derive(Debug, PartialEq, Eq)]
    pub enum CommandExpr {
        HelpTopic(
            #[rust_sitter::leaf(text = "help")] (),
            #[rust_sitter::leaf(pattern = r"[a-z]+", transform = parse_sym)] String,
        ),
        Help(#[rust_sitter::leaf(text = "help")] ()),
        Go(#[rust_sitter::leaf(text = "c")] ()),
        Quit(#[rust_sitter::leaf(text = "q")] ()),
        StepCount(
            #[rust_sitter::leaf(text = "si")] (),
            #[rust_sitter::leaf(pattern = r"(\d+|0x[0-9a-fA-F]+)", transform = parse_int)] u64,
        ),
        StepInto(#[rust_sitter::leaf(text = "si")] ()),
        DisplaySpecificRegister(
            #[rust_sitter::leaf(text = "info")] (),
            #[rust_sitter::leaf(text = "r")] (),
            #[rust_sitter::leaf(pattern = r"\$?[a-zA-Z0-9]+", transform = parse_register)] String,
        ),
        DisplayRegisters(#[rust_sitter::leaf(text = "info")] (), #[rust_sitter::leaf(text = "r")] ()),
        ListWatchpoints(#[rust_sitter::leaf(text = "info")] (), #[rust_sitter::leaf(text = "w")] ()),
        DisplayMemory(
            #[rust_sitter::leaf(text = "x")] (),
            #[rust_sitter::leaf(pattern = r"(\d+|0x[0-9a-fA-F]+)", transform = parse_int)] u64,
            #[rust_sitter::leaf(pattern = r"\S.*", transform = parse_expr)] String,
        ),
        Evaluate(
            #[rust_sitter::leaf(text = "p")] (),
            #[rust_sitter::leaf(pattern = r"\S.*", transform = parse_expr)] String,
        ),
        SetWatchpoint(
            #[rust_sitter::leaf(text = "w")] (),
            #[rust_sitter::leaf(pattern = r"\S.*", transform = parse_expr)] String,
        ),
        ClearWatchpoint(
            #[rust_sitter::leaf(text = "d")] (),
            #[rust_sitter::leaf(pattern = r"\d+", transform = parse_index)] usize,
        ),
    }

    #[rust_sitter::extra]
    struct Whitespace {
        #[rust_sitter::leaf(pattern = r"\s")]
        _whitespace: (),
    }

    // Counts too large for the type saturate
    fn parse_int(text: &str) -> u64 {
        let parsed = match text.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => text.parse(),
        };
        parsed.unwrap_or(u64::MAX)
    }

    fn parse_index(text: &str) -> usize {
        text.parse().unwrap_or(usize::MAX)
    }

    fn parse_sym(text: &str) -> String {
        text.to_owned()
    }

    fn parse_register(text: &str) -> String {
        text.trim_start_matches('$').to_owned()
    }

    // The rest of the line goes to the expression lexer untouched
    fn parse_expr(text: &str) -> String {
        text.trim_end().to_owned()
    }
}

pub use grammar::CommandExpr;

pub const COMMAND_TABLE: &[(&str, &str)] = &[
    ("help", "Display information about all supported commands"),
    ("c", "Continue the execution of the program"),
    ("q", "Exit the debugger"),
    ("si", "Execute N instructions in a single step (si [N])"),
    ("info", "Print program status (info r [REG] | info w)"),
    ("x", "Examine N words of memory starting at EXPR (x N EXPR)"),
    ("p", "Print value of expression (p EXPR)"),
    ("w", "Set a watchpoint on an expression (w EXPR)"),
    ("d", "Delete a watchpoint (d N)"),
];

pub fn display_help(topic: Option<&str>) {
    match topic {
        None => {
            for (name, description) in COMMAND_TABLE {
                println!("{} - {}", name, description);
            }
        }
        Some(topic) => match COMMAND_TABLE.iter().find(|(name, _)| *name == topic) {
            Some((name, description)) => println!("{} - {}", name, description),
            None => println!("Unknown command '{}'", topic),
        },
    }
}

fn convert_parse_error_to_diagnostics(
    file_span: &codemap::Span,
    error: &ParseError,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let span = file_span.subspan(error.start as u64, error.end as u64);
    match &error.reason {
        ParseErrorReason::MissingToken(tok) => diagnostics.push(Diagnostic {
            level: Level::Error,
            message: format!("Missing argument: \"{tok}\""),
            code: None,
            spans: vec![SpanLabel { span, style: SpanStyle::Primary, label: Some(format!("missing \"{tok}\"")) }],
        }),

        ParseErrorReason::UnexpectedToken(tok) => diagnostics.push(Diagnostic {
            level: Level::Error,
            message: format!("Unknown command or argument: \"{tok}\""),
            code: None,
            spans: vec![SpanLabel { span, style: SpanStyle::Primary, label: Some("not understood".to_string()) }],
        }),

        ParseErrorReason::FailedNode(errors) if errors.is_empty() => diagnostics.push(Diagnostic {
            level: Level::Error,
            message: "Malformed command".to_string(),
            code: None,
            spans: vec![SpanLabel { span, style: SpanStyle::Primary, label: Some("here".to_string()) }],
        }),

        ParseErrorReason::FailedNode(errors) => {
            for error in errors {
                convert_parse_error_to_diagnostics(file_span, error, diagnostics);
            }
        }
    }
}

fn emit(source_name: &str, source: &str, build: impl FnOnce(&codemap::Span) -> Vec<Diagnostic>) {
    let mut codemap = CodeMap::new();
    let file_span = codemap.add_file(source_name.to_string(), source.to_string());
    let diagnostics = build(&file_span.span);
    let mut emitter = Emitter::stderr(ColorConfig::Auto, Some(&codemap));
    emitter.emit(&diagnostics);
}

pub fn report_command_errors(input: &str, errors: &[ParseError]) {
    emit("<input>", input, |file_span| {
        let mut diagnostics = vec![];
        for error in errors {
            convert_parse_error_to_diagnostics(file_span, error, &mut diagnostics);
        }
        diagnostics
    });
}

/// Points at the lexer failure position when there is one, otherwise at the whole expression.
pub fn report_expression_error(expr: &str, error: &ExprError) {
    let (start, end) = match error {
        ExprError::Lex(e) => e.span(expr).unwrap_or((0, expr.len())),
        _ => (0, expr.len()),
    };
    emit("<expr>", expr, |file_span| {
        vec![Diagnostic {
            level: Level::Error,
            message: error.to_string(),
            code: None,
            spans: vec![SpanLabel {
                span: file_span.subspan(start as u64, end as u64),
                style: SpanStyle::Primary,
                label: Some("here".to_string()),
            }],
        }]
    })
}

/// Prompts until a well-formed command is entered. End of input quits.
pub fn read_command() -> Result<CommandExpr> {
    read_command_from(&mut std::io::stdin().lock(), &mut std::io::stdout())
}

fn read_command_from(input: &mut impl BufRead, output: &mut impl Write) -> Result<CommandExpr> {
    loop {
        write!(output, "(sdb) ")?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            return Ok(CommandExpr::Quit(()));
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match grammar::parse(line) {
            Ok(cmd) => return Ok(cmd),
            Err(errors) => report_command_errors(line, &errors),
        }
    }
}
