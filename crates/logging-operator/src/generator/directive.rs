use std::fmt::{self, Write};

/// A fluentd configuration section: `<name arg> ... </name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    name: String,
    arg: Option<String>,
    body: Vec<Line>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Param(String, String),
    Comment(String),
    Section(Directive),
}

impl Directive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg: None,
            body: Vec::new(),
        }
    }

    pub fn with_arg(name: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            arg: Some(arg.into()),
            ..Self::new(name)
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.body.push(Line::Param(key.into(), value.into()));
        self
    }

    pub fn param_if(self, cond: bool, key: impl Into<String>, value: impl Into<String>) -> Self {
        if cond {
            self.param(key, value)
        } else {
            self
        }
    }

    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.body.push(Line::Comment(text.into()));
        self
    }

    pub fn section(mut self, child: Directive) -> Self {
        self.body.push(Line::Section(child));
        self
    }

    pub fn sections(mut self, children: impl IntoIterator<Item = Directive>) -> Self {
        self.body
            .extend(children.into_iter().map(Line::Section));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg(&self) -> Option<&str> {
        self.arg.as_deref()
    }

    fn render(&self, out: &mut String, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        match &self.arg {
            Some(arg) => writeln!(out, "{indent}<{} {arg}>", self.name)?,
            None => writeln!(out, "{indent}<{}>", self.name)?,
        }
        for line in &self.body {
            match line {
                Line::Param(key, value) if value.is_empty() => writeln!(out, "{indent}  {key}")?,
                Line::Param(key, value) => writeln!(out, "{indent}  {key} {value}")?,
                Line::Comment(text) => writeln!(out, "{indent}  # {text}")?,
                Line::Section(child) => child.render(out, depth + 1)?,
            }
        }
        writeln!(out, "{indent}</{}>", self.name)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&mut out, 0)?;
        f.write_str(&out)
    }
}
