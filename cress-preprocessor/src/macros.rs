//! Macro definitions and the table that stores them.

use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use cress_foundation::{
    errors::{Diagnostic, DiagnosticKind, DiagnosticSink},
    intern::{StringId, StringTable},
    source::SourceLocation,
};
use cress_lexer::token::{Token, TokenKind, TokenSeq, TokenValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroKind {
    ObjectLike,
    FunctionLike {
        /// Number of named parameters.
        params: u32,
        variadic: bool,
    },
}

/// A `#define`d macro.
#[derive(Debug, Clone)]
pub struct Macro {
    pub name: StringId,
    pub kind: MacroKind,
    /// Replacement list; parameter references appear as `Param` tokens.
    pub replacement: TokenSeq,
}

impl Macro {
    /// Token-for-token identity, ignoring leading whitespace. Governs
    /// whether a redefinition is accepted silently.
    fn is_identical_to(&self, other: &Macro) -> bool {
        self.kind == other.kind
            && self.replacement.len() == other.replacement.len()
            && self
                .replacement
                .iter()
                .zip(other.replacement.iter())
                .all(|(a, b)| a.kind == b.kind && a.value == b.value && a.flags == b.flags)
    }

    pub fn is_function_like(&self) -> bool {
        matches!(self.kind, MacroKind::FunctionLike { .. })
    }
}

/// What a name lookup resolved to. `__FILE__` and `__LINE__` have no stored
/// replacement; they are produced from the current input position at every
/// use.
pub enum MacroLookup<'a> {
    Static(&'a Macro),
    CurrentFile,
    CurrentLine,
}

/// The macro table for one translation unit.
pub struct MacroTable {
    macros: HashMap<StringId, Macro>,
    file_name: StringId,
    line_name: StringId,
}

impl MacroTable {
    pub fn new(strings: &mut StringTable) -> Self {
        Self {
            macros: HashMap::new(),
            file_name: strings.intern("__FILE__"),
            line_name: strings.intern("__LINE__"),
        }
    }

    fn is_dynamic(&self, name: StringId) -> bool {
        name == self.file_name || name == self.line_name
    }

    pub fn lookup(&self, name: StringId) -> Option<MacroLookup<'_>> {
        if name == self.file_name {
            Some(MacroLookup::CurrentFile)
        } else if name == self.line_name {
            Some(MacroLookup::CurrentLine)
        } else {
            self.macros.get(&name).map(MacroLookup::Static)
        }
    }

    /// `defined` and `#ifdef` probe.
    pub fn is_defined(&self, name: StringId) -> bool {
        self.is_dynamic(name) || self.macros.contains_key(&name)
    }

    pub fn define(
        &mut self,
        strings: &StringTable,
        def: Macro,
        location: &SourceLocation,
        diagnostics: &mut dyn DiagnosticSink,
    ) {
        if self.is_dynamic(def.name) {
            diagnostics.emit(
                Diagnostic::warning(
                    DiagnosticKind::Macro,
                    format!("cannot redefine '{}'", strings.get(def.name)),
                )
                .with_location(location.clone()),
            );
            return;
        }
        if let Some(existing) = self.macros.get(&def.name) {
            if existing.is_identical_to(&def) {
                return;
            }
            diagnostics.emit(
                Diagnostic::warning(
                    DiagnosticKind::Macro,
                    format!("macro '{}' redefined", strings.get(def.name)),
                )
                .with_location(location.clone()),
            );
        }
        self.macros.insert(def.name, def);
    }

    pub fn undef(
        &mut self,
        strings: &StringTable,
        name: StringId,
        location: &SourceLocation,
        diagnostics: &mut dyn DiagnosticSink,
    ) {
        if self.is_dynamic(name) {
            diagnostics.emit(
                Diagnostic::warning(
                    DiagnosticKind::Macro,
                    format!("cannot undefine '{}'", strings.get(name)),
                )
                .with_location(location.clone()),
            );
            return;
        }
        self.macros.remove(&name);
    }

    /// Releases all definitions. Dynamic macros stay resolvable.
    pub fn clear(&mut self) {
        self.macros.clear();
    }

    /// Installs the static predefined macros. `-D` entries are injected as
    /// `#define` lines by the driver afterwards.
    pub fn install_predefined(&mut self, strings: &mut StringTable) {
        let (date, time) = date_and_time();
        let predefined: &[(&str, Token)] = &[
            ("__STDC__", prep_number(strings, "1")),
            ("__STDC_HOSTED__", prep_number(strings, "1")),
            ("__STDC_VERSION__", prep_number(strings, "199901L")),
            ("__DATE__", prep_string(strings, &date)),
            ("__TIME__", prep_string(strings, &time)),
        ];
        for (name, token) in predefined {
            let name = strings.intern(name);
            self.macros.insert(
                name,
                Macro {
                    name,
                    kind: MacroKind::ObjectLike,
                    replacement: vec![token.clone()],
                },
            );
        }
    }
}

pub(crate) fn prep_number(strings: &mut StringTable, text: &str) -> Token {
    let mut token = Token::new(TokenKind::PrepNumber);
    token.value = TokenValue::Str(strings.intern(text));
    token
}

fn prep_string(strings: &mut StringTable, content: &str) -> Token {
    let mut token = Token::new(TokenKind::PrepString);
    token.value = TokenValue::Str(strings.intern(format!("\"{content}\"")));
    token
}

/// `__DATE__`/`__TIME__` content in the classic `"Mmm dd yyyy"` and
/// `"hh:mm:ss"` shapes, from the system clock.
fn date_and_time() -> (String, String) {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];

    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    let days = (secs / 86_400) as i64;
    let time_of_day = secs % 86_400;

    // Civil-from-days, Gregorian calendar.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    (
        format!("{} {:2} {}", MONTHS[(month - 1) as usize], day, year),
        format!(
            "{:02}:{:02}:{:02}",
            time_of_day / 3600,
            time_of_day % 3600 / 60,
            time_of_day % 60
        ),
    )
}

#[cfg(test)]
mod tests {
    use cress_foundation::{errors::Diagnostic, intern::StringTable, source::SourceLocation};
    use cress_lexer::token::{TokenKind, TokenValue};

    use super::{prep_number, Macro, MacroKind, MacroLookup, MacroTable};

    fn object_macro(strings: &mut StringTable, name: &str, body: &str) -> Macro {
        Macro {
            name: strings.intern(name),
            kind: MacroKind::ObjectLike,
            replacement: vec![prep_number(strings, body)],
        }
    }

    #[test]
    fn identical_redefinition_is_silent() {
        let mut strings = StringTable::new();
        let mut table = MacroTable::new(&mut strings);
        let mut diagnostics: Vec<Diagnostic> = vec![];
        let location = SourceLocation::unknown();

        let def = object_macro(&mut strings, "N", "1");
        table.define(&strings, def.clone(), &location, &mut diagnostics);
        table.define(&strings, def, &location, &mut diagnostics);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn conflicting_redefinition_warns_and_wins() {
        let mut strings = StringTable::new();
        let mut table = MacroTable::new(&mut strings);
        let mut diagnostics: Vec<Diagnostic> = vec![];
        let location = SourceLocation::unknown();

        let first = object_macro(&mut strings, "N", "1");
        let second = object_macro(&mut strings, "N", "2");
        table.define(&strings, first, &location, &mut diagnostics);
        table.define(&strings, second, &location, &mut diagnostics);
        assert_eq!(diagnostics.len(), 1);

        let name = strings.get_existing("N").unwrap();
        let Some(MacroLookup::Static(def)) = table.lookup(name) else {
            panic!("N should still be defined");
        };
        let TokenValue::Str(id) = def.replacement[0].value else {
            panic!("replacement should be a number lexeme");
        };
        assert_eq!(strings.get(id), "2");
    }

    #[test]
    fn undef_removes_and_lookup_misses() {
        let mut strings = StringTable::new();
        let mut table = MacroTable::new(&mut strings);
        let mut diagnostics: Vec<Diagnostic> = vec![];
        let location = SourceLocation::unknown();

        let def = object_macro(&mut strings, "N", "1");
        let name = def.name;
        table.define(&strings, def, &location, &mut diagnostics);
        assert!(table.is_defined(name));
        table.undef(&strings, name, &location, &mut diagnostics);
        assert!(!table.is_defined(name));
        assert!(table.lookup(name).is_none());
    }

    #[test]
    fn dynamic_macros_resolve_specially_and_resist_undef() {
        let mut strings = StringTable::new();
        let mut table = MacroTable::new(&mut strings);
        let mut diagnostics: Vec<Diagnostic> = vec![];
        let location = SourceLocation::unknown();

        let file = strings.intern("__FILE__");
        assert!(matches!(table.lookup(file), Some(MacroLookup::CurrentFile)));
        assert!(table.is_defined(file));

        table.undef(&strings, file, &location, &mut diagnostics);
        assert_eq!(diagnostics.len(), 1);
        assert!(table.is_defined(file));
    }

    #[test]
    fn predefined_macros_install() {
        let mut strings = StringTable::new();
        let mut table = MacroTable::new(&mut strings);
        table.install_predefined(&mut strings);
        for name in ["__STDC__", "__STDC_HOSTED__", "__STDC_VERSION__", "__DATE__", "__TIME__"] {
            let id = strings.intern(name);
            assert!(table.is_defined(id), "{name} should be predefined");
        }
        let date = strings.intern("__DATE__");
        let Some(MacroLookup::Static(def)) = table.lookup(date) else {
            panic!("__DATE__ should be object-like");
        };
        assert_eq!(def.replacement.len(), 1);
        assert_eq!(def.replacement[0].kind, TokenKind::PrepString);
    }

    #[test]
    fn identity_ignores_leading_whitespace() {
        let mut strings = StringTable::new();
        let mut table = MacroTable::new(&mut strings);
        let mut diagnostics: Vec<Diagnostic> = vec![];
        let location = SourceLocation::unknown();

        let mut first = object_macro(&mut strings, "N", "1");
        let mut second = first.clone();
        first.replacement[0].leading_whitespace = 0;
        second.replacement[0].leading_whitespace = 4;
        table.define(&strings, first, &location, &mut diagnostics);
        table.define(&strings, second, &location, &mut diagnostics);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn differing_kind_is_a_conflict() {
        let mut strings = StringTable::new();
        let mut table = MacroTable::new(&mut strings);
        let mut diagnostics: Vec<Diagnostic> = vec![];
        let location = SourceLocation::unknown();

        let object = object_macro(&mut strings, "N", "1");
        let mut function = object.clone();
        function.kind = MacroKind::FunctionLike {
            params: 0,
            variadic: false,
        };
        table.define(&strings, object, &location, &mut diagnostics);
        table.define(&strings, function, &location, &mut diagnostics);
        assert_eq!(diagnostics.len(), 1);
    }

}
