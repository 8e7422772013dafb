// VSL Text Emitter
// Line-oriented output shared by the backends

use std::fmt::Display;

/// Layout conventions of one target's text format
#[derive(Debug, Clone, Copy)]
pub struct Style {
    /// Prefix of instruction lines
    pub indent: &'static str,
    /// Extra indentation per nesting level (scripting output)
    pub nest: &'static str,
    /// Line comment marker
    pub comment: &'static str,
    /// Separator between instruction operands
    pub separator: &'static str,
    /// Operands after the mnemonic are separated by this
    pub mnemonic_gap: &'static str,
    /// Mnemonic column width, 0 for none
    pub mnemonic_width: usize,
}

pub const CIL_STYLE: Style = Style {
    indent: "            ",
    nest: "",
    comment: "//",
    separator: "\t",
    mnemonic_gap: "\t",
    mnemonic_width: 0,
};

pub const JASMIN_STYLE: Style = Style {
    indent: "    ",
    nest: "",
    comment: ";",
    separator: " ",
    mnemonic_gap: " ",
    mnemonic_width: 0,
};

pub const NASM_STYLE: Style = Style {
    indent: "    ",
    nest: "",
    comment: ";",
    separator: ", ",
    mnemonic_gap: " ",
    mnemonic_width: 7,
};

pub const SCRIPT_STYLE: Style = Style {
    indent: "",
    nest: "    ",
    comment: "//",
    separator: "",
    mnemonic_gap: "",
    mnemonic_width: 0,
};

/// Accumulates target text. Nothing reaches the caller's sink until
/// generation has succeeded, so a failed run leaves no partial output.
#[derive(Debug)]
pub struct Emitter {
    out: String,
    style: Style,
    comments: bool,
    depth: usize,
}

impl Emitter {
    pub fn new(style: Style, comments: bool) -> Self {
        Self {
            out: String::new(),
            style,
            comments,
            depth: 0,
        }
    }

    /// One instruction with its operands
    pub fn op(&mut self, mnemonic: &str, args: &[&dyn Display]) {
        self.prefix();
        if args.is_empty() {
            self.out.push_str(mnemonic);
        } else {
            let width = self.style.mnemonic_width;
            self.out.push_str(&format!("{:<width$}", mnemonic, width = width));
            self.out.push_str(self.style.mnemonic_gap);
            let operands: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            self.out.push_str(&operands.join(self.style.separator));
        }
        self.out.push('\n');
    }

    /// Jump target at column zero
    pub fn label(&mut self, name: &str) {
        self.out.push_str(name);
        self.out.push_str(":\n");
    }

    pub fn comment(&mut self, text: impl Display) {
        if !self.comments {
            return;
        }
        self.prefix();
        self.out
            .push_str(&format!("{} {}\n", self.style.comment, text));
    }

    /// Comment at column zero (section headings)
    pub fn heading(&mut self, text: impl Display) {
        if self.comments {
            self.out
                .push_str(&format!("{} {}\n", self.style.comment, text));
        }
    }

    /// A line at the current nesting depth
    pub fn line(&mut self, text: impl Display) {
        self.prefix();
        self.out.push_str(&text.to_string());
        self.out.push('\n');
    }

    /// Verbatim text, no indentation
    pub fn raw(&mut self, text: &str) {
        self.out.push_str(text);
        if !text.ends_with('\n') {
            self.out.push('\n');
        }
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn prefix(&mut self) {
        self.out.push_str(self.style.indent);
        for _ in 0..self.depth {
            self.out.push_str(self.style.nest);
        }
    }
}

/// Double-quoted literal with C-style escapes (managed and JVM assemblers)
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
