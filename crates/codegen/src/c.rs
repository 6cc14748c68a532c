//! C rendering of a numeric plan.
//!
//! The input parser is a key scanner, not a JSON parser: it finds the
//! first `"<key>"` followed by `:` and reads a number with `strtod`. A
//! quoted `<key>` in value position is skipped.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::plan::{NumericBinaryOp, NumericExpr, NumericFlowPlan, NumericUnaryOp};
use crate::project::{slug, Target};

const PRELUDE: &str = r#"#include "namel3ss.h"

#include <ctype.h>
#include <math.h>
#include <stdio.h>
#include <stdlib.h>
#include <string.h>

static int n3_set_error(char **error_json, const char *code) {
  const char *prefix = "{\"error\":\"";
  const char *suffix = "\"}";
  size_t size = strlen(prefix) + strlen(code) + strlen(suffix) + 1;
  char *buffer = (char *)malloc(size);
  if (buffer == NULL) {
    return 1;
  }
  (void)snprintf(buffer, size, "%s%s%s", prefix, code, suffix);
  *error_json = buffer;
  return 1;
}

static const char *n3_find_key(const char *json, const char *key) {
  size_t key_len = strlen(key);
  const char *cursor = json;
  while ((cursor = strchr(cursor, '"')) != NULL) {
    cursor += 1;
    if (strncmp(cursor, key, key_len) == 0 && cursor[key_len] == '"') {
      return cursor + key_len + 1;
    }
  }
  return NULL;
}

static const char *n3_find_value(const char *json, const char *key) {
  const char *cursor = json;
  while ((cursor = n3_find_key(cursor, key)) != NULL) {
    const char *after = cursor;
    while (*after != '\0' && isspace((unsigned char)*after)) {
      after += 1;
    }
    if (*after == ':') {
      return after + 1;
    }
  }
  return NULL;
}

static int n3_extract_number(const char *json, const char *key, double *out) {
  const char *cursor = n3_find_value(json, key);
  if (cursor == NULL) {
    return 0;
  }
  while (*cursor != '\0' && isspace((unsigned char)*cursor)) {
    cursor += 1;
  }
  char *end = NULL;
  double value = strtod(cursor, &end);
  if (end == cursor) {
    return 0;
  }
  *out = value;
  return 1;
}
"#;

const EPILOGUE: &str = r#"  if (!isfinite(result)) {
    return n3_set_error(error_json, "non_finite_result");
  }
  int size = snprintf(NULL, 0, "{\"result\":%.17g}", result);
  if (size < 0) {
    return n3_set_error(error_json, "format_failed");
  }
  char *buffer = (char *)malloc((size_t)size + 1);
  if (buffer == NULL) {
    return n3_set_error(error_json, "out_of_memory");
  }
  (void)snprintf(buffer, (size_t)size + 1, "{\"result\":%.17g}", result);
  *output_json = buffer;
  return 0;
}

void free_json_string(char *ptr) {
  free(ptr);
}
"#;

/// C identifiers for plan names. Distinct names that slug to the same
/// identifier get a numeric suffix.
#[derive(Default)]
struct Names {
    assigned: BTreeMap<(&'static str, String), String>,
    taken: BTreeMap<String, usize>,
}

impl Names {
    fn get(&mut self, prefix: &'static str, name: &str) -> String {
        if let Some(ident) = self.assigned.get(&(prefix, name.to_string())) {
            return ident.clone();
        }
        let base = format!("{}_{}", prefix, slug(name));
        let count = self.taken.entry(base.clone()).or_insert(0);
        let ident = if *count == 0 {
            base.clone()
        } else {
            format!("{}_{}", base, count)
        };
        *count += 1;
        self.assigned.insert((prefix, name.to_string()), ident.clone());
        ident
    }

    fn input(&mut self, key: &str) -> String {
        self.get("input", key)
    }

    fn local(&mut self, name: &str) -> String {
        self.get("local", name)
    }
}

pub(crate) fn render_source(plan: &NumericFlowPlan) -> String {
    let mut names = Names::default();
    let mut out = String::from(PRELUDE);
    out.push('\n');
    out.push_str("int run_flow(const char *input_json, char **output_json, char **error_json) {\n");
    out.push_str("  if (output_json == NULL || error_json == NULL) {\n    return 1;\n  }\n");
    out.push_str("  *output_json = NULL;\n  *error_json = NULL;\n");
    out.push_str("  if (input_json == NULL) {\n    input_json = \"{}\";\n  }\n");

    for key in &plan.input_keys {
        let ident = names.input(key);
        let escaped = escape_c_string(key);
        let _ = writeln!(out, "  double {} = 0.0;", ident);
        let _ = writeln!(
            out,
            "  if (!n3_extract_number(input_json, \"{}\", &{})) {{",
            escaped, ident
        );
        let _ = writeln!(
            out,
            "    return n3_set_error(error_json, \"missing_or_invalid_input_{}\");",
            escape_c_string(&slug(key))
        );
        out.push_str("  }\n");
    }

    out.push('\n');
    let mut declared = std::collections::BTreeSet::new();
    for assignment in &plan.assignments {
        let value = emit(&assignment.expr, &mut names);
        let ident = names.local(&assignment.name);
        if declared.insert(ident.clone()) {
            let _ = writeln!(out, "  double {} = {};", ident, value);
        } else {
            let _ = writeln!(out, "  {} = {};", ident, value);
        }
    }
    let _ = writeln!(out, "  double result = {};", emit(&plan.result, &mut names));
    out.push_str(EPILOGUE);
    out
}

fn emit(expr: &NumericExpr, names: &mut Names) -> String {
    match expr {
        NumericExpr::NumberLiteral { text } => text.clone(),
        NumericExpr::InputNumber { key } => names.input(key),
        NumericExpr::LocalNumber { name } => names.local(name),
        NumericExpr::UnaryNumber { op, operand } => {
            let sign = match op {
                NumericUnaryOp::Plus => "+",
                NumericUnaryOp::Minus => "-",
            };
            format!("({}{})", sign, emit(operand, names))
        }
        NumericExpr::BinaryNumber { op, left, right } => {
            let left = emit(left, names);
            let right = emit(right, names);
            match op {
                NumericBinaryOp::Add => format!("({} + {})", left, right),
                NumericBinaryOp::Sub => format!("({} - {})", left, right),
                NumericBinaryOp::Mul => format!("({} * {})", left, right),
                NumericBinaryOp::Div => format!("({} / {})", left, right),
                NumericBinaryOp::Mod => format!("fmod({}, {})", left, right),
            }
        }
    }
}

pub(crate) fn render_header(flow_slug: &str) -> String {
    let guard = format!("NAMELESS_COMPILED_{}_H", flow_slug.to_ascii_uppercase());
    format!(
        "#ifndef {guard}\n\
         #define {guard}\n\
         \n\
         #ifdef __cplusplus\n\
         extern \"C\" {{\n\
         #endif\n\
         \n\
         int run_flow(const char *input_json, char **output_json, char **error_json);\n\
         void free_json_string(char *ptr);\n\
         \n\
         #ifdef __cplusplus\n\
         }}\n\
         #endif\n\
         \n\
         #endif /* {guard} */\n",
        guard = guard
    )
}

pub(crate) fn render_makefile(flow_slug: &str, artifact: &str, target: Target) -> String {
    format!(
        "FLOW={}\nARTIFACT={}\nCC?=cc\n\nall:\n\t$(CC) {} -o $(ARTIFACT) $(FLOW).c -lm\n\nclean:\n\trm -f $(ARTIFACT)\n",
        flow_slug,
        artifact,
        target.compiler_flags().join(" ")
    )
}

pub(crate) fn render_readme(flow_slug: &str, artifact: &str, build_command: &[String]) -> String {
    format!(
        "# Compiled flow {slug}\n\
         \n\
         This project exposes a stable C ABI:\n\
         \n\
         - `int run_flow(const char *input_json, char **output_json, char **error_json)`\n\
         - `void free_json_string(char *ptr)`\n\
         \n\
         `run_flow` returns 0 and sets `*output_json` to `{{\"result\": <number>}}` on\n\
         success. On failure it returns 1 and sets `*error_json` to\n\
         `{{\"error\": \"<code>\"}}`. Release both strings with `free_json_string`.\n\
         \n\
         Build with:\n\
         \n\
         ```bash\n\
         make\n\
         ```\n\
         \n\
         or directly:\n\
         \n\
         ```bash\n\
         {command}\n\
         ```\n\
         \n\
         The shared library is written to `{artifact}`.\n",
        slug = flow_slug,
        command = build_command.join(" "),
        artifact = artifact
    )
}

fn escape_c_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_control() => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::NumericAssignment;

    fn lit(text: &str) -> NumericExpr {
        NumericExpr::NumberLiteral { text: text.into() }
    }

    #[test]
    fn modulo_lowers_to_fmod() {
        let mut names = Names::default();
        let expr = NumericExpr::BinaryNumber {
            op: NumericBinaryOp::Mod,
            left: Box::new(NumericExpr::InputNumber { key: "a".into() }),
            right: Box::new(lit("3.0")),
        };
        assert_eq!(emit(&expr, &mut names), "fmod(input_a, 3.0)");
    }

    #[test]
    fn colliding_names_get_suffixes() {
        let mut names = Names::default();
        assert_eq!(names.input("unit-price"), "input_unit_price");
        assert_eq!(names.input("unit_price"), "input_unit_price_1");
        assert_eq!(names.input("unit-price"), "input_unit_price");
        assert_eq!(names.local("unit_price"), "local_unit_price");
    }

    #[test]
    fn rebinding_a_local_assigns_instead_of_redeclaring() {
        let plan = NumericFlowPlan {
            flow_name: "f".into(),
            assignments: vec![
                NumericAssignment { name: "x".into(), expr: lit("1.0") },
                NumericAssignment {
                    name: "x".into(),
                    expr: NumericExpr::BinaryNumber {
                        op: NumericBinaryOp::Add,
                        left: Box::new(NumericExpr::LocalNumber { name: "x".into() }),
                        right: Box::new(lit("1.0")),
                    },
                },
            ],
            result: NumericExpr::LocalNumber { name: "x".into() },
            input_keys: vec![],
        };
        let source = render_source(&plan);
        assert!(source.contains("  double local_x = 1.0;\n  local_x = (local_x + 1.0);\n"));
        assert!(source.contains("  double result = local_x;\n"));
    }

    #[test]
    fn keys_are_escaped_in_c_strings() {
        assert_eq!(escape_c_string("a\"b\\c"), "a\\\"b\\\\c");
    }
}
