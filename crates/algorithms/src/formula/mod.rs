//! Sandboxed formula evaluation
//!
//! Formulas are arithmetic expressions over named fields:
//! `+ - * / ^` (also `**`), parentheses, numeric literals and a fixed set of
//! functions (`abs, min, max, round, pow, sqrt, log, log10, exp, floor,
//! ceil`). Nothing else resolves; there is no way to reach outside the
//! values handed to [`Formula::evaluate`].
//!
//! Two binding modes exist:
//! - **aggregate**: identifiers name output-table columns of the same zone,
//!   e.g. `(B_mean - A_mean) / A_mean` with `A -> ndvi_2020`,
//!   `B -> ndvi_2024` reading `ndvi_2020_mean` and `ndvi_2024_mean`.
//! - **pixel**: identifiers name raster layers; the expression is evaluated
//!   per pixel and the resulting series is reduced with the configured
//!   output statistics into `{name}_{stat}` columns.

mod parser;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::{PixelSample, PixelStack};
use crate::statistics::{Statistic, aggregate};

pub use parser::{BinaryOp, Expr, UnaryOp};

/// Failure while evaluating a parsed formula
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{function}() takes {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    #[error("result is not a finite number")]
    NonFinite,
}

/// Formula errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("syntax error at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Abs,
    Min,
    Max,
    Round,
    Pow,
    Sqrt,
    Log,
    Log10,
    Exp,
    Floor,
    Ceil,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Function::Abs,
            "min" => Function::Min,
            "max" => Function::Max,
            "round" => Function::Round,
            "pow" => Function::Pow,
            "sqrt" => Function::Sqrt,
            "log" => Function::Log,
            "log10" => Function::Log10,
            "exp" => Function::Exp,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            _ => return None,
        })
    }

    /// (minimum, maximum) argument count; `None` means unbounded
    fn arity(self) -> (usize, Option<usize>) {
        match self {
            Function::Min | Function::Max => (1, None),
            Function::Round | Function::Log => (1, Some(2)),
            Function::Pow => (2, Some(2)),
            _ => (1, Some(1)),
        }
    }

    fn check_arity(self, name: &str, found: usize) -> Result<(), EvaluationError> {
        let (lo, hi) = self.arity();
        let ok = found >= lo && hi.is_none_or(|hi| found <= hi);
        if ok {
            return Ok(());
        }
        let expected = match hi {
            None => format!("at least {}", lo),
            Some(hi) if hi == lo => lo.to_string(),
            Some(hi) => format!("{} or {}", lo, hi),
        };
        Err(EvaluationError::Arity {
            function: name.to_string(),
            expected,
            found,
        })
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Function::Abs => args[0].abs(),
            Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Function::Round => match args.get(1) {
                Some(&digits) => {
                    let scale = 10f64.powi(digits.trunc() as i32);
                    (args[0] * scale).round_ties_even() / scale
                }
                None => args[0].round_ties_even(),
            },
            Function::Pow => args[0].powf(args[1]),
            Function::Sqrt => args[0].sqrt(),
            Function::Log => match args.get(1) {
                Some(&base) => args[0].ln() / base.ln(),
                None => args[0].ln(),
            },
            Function::Log10 => args[0].log10(),
            Function::Exp => args[0].exp(),
            Function::Floor => args[0].floor(),
            Function::Ceil => args[0].ceil(),
        }
    }
}

/// A parsed formula
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        Ok(Self {
            source: source.to_string(),
            expr: parser::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Referenced identifiers, in first-use order
    pub fn variables(&self) -> Vec<String> {
        fn walk(expr: &Expr, out: &mut Vec<String>) {
            match expr {
                Expr::Number(_) => {}
                Expr::Variable(name) => {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                }
                Expr::Unary { operand, .. } => walk(operand, out),
                Expr::Binary { left, right, .. } => {
                    walk(left, out);
                    walk(right, out);
                }
                Expr::Call { args, .. } => args.iter().for_each(|a| walk(a, out)),
            }
        }
        let mut out = Vec::new();
        walk(&self.expr, &mut out);
        out
    }

    /// Check every call against the function table without evaluating
    pub fn validate(&self) -> Result<(), EvaluationError> {
        fn walk(expr: &Expr) -> Result<(), EvaluationError> {
            match expr {
                Expr::Number(_) | Expr::Variable(_) => Ok(()),
                Expr::Unary { operand, .. } => walk(operand),
                Expr::Binary { left, right, .. } => {
                    walk(left)?;
                    walk(right)
                }
                Expr::Call { function, args } => {
                    let f = Function::lookup(function)
                        .ok_or_else(|| EvaluationError::UnknownFunction(function.clone()))?;
                    f.check_arity(function, args.len())?;
                    args.iter().try_for_each(walk)
                }
            }
        }
        walk(&self.expr)
    }

    /// Evaluate with `lookup` resolving identifiers.
    ///
    /// Division by exactly zero is an error; any other non-finite outcome
    /// is reported as [`EvaluationError::NonFinite`].
    pub fn evaluate<F>(&self, lookup: F) -> Result<f64, EvaluationError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let value = eval(&self.expr, &lookup)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EvaluationError::NonFinite)
        }
    }
}

impl FromStr for Formula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Formula::parse(s)
    }
}

fn eval<F>(expr: &Expr, lookup: &F) -> Result<f64, EvaluationError>
where
    F: Fn(&str) -> Option<f64>,
{
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Variable(name) => {
            lookup(name).ok_or_else(|| EvaluationError::MissingField(name.clone()))
        }
        Expr::Unary { op, operand } => {
            let v = eval(operand, lookup)?;
            Ok(match op {
                UnaryOp::Plus => v,
                UnaryOp::Minus => -v,
            })
        }
        Expr::Binary { op, left, right } => {
            let l = eval(left, lookup)?;
            let r = eval(right, lookup)?;
            match op {
                BinaryOp::Add => Ok(l + r),
                BinaryOp::Sub => Ok(l - r),
                BinaryOp::Mul => Ok(l * r),
                BinaryOp::Div if r == 0.0 => Err(EvaluationError::DivisionByZero),
                BinaryOp::Div => Ok(l / r),
                BinaryOp::Pow => Ok(l.powf(r)),
            }
        }
        Expr::Call { function, args } => {
            let f = Function::lookup(function)
                .ok_or_else(|| EvaluationError::UnknownFunction(function.clone()))?;
            f.check_arity(function, args.len())?;
            let values = args
                .iter()
                .map(|a| eval(a, lookup))
                .collect::<Result<Vec<f64>, _>>()?;
            Ok(f.apply(&values))
        }
    }
}

/// How a formula's identifiers are bound
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaMode {
    /// Identifiers are output columns of the zone's row
    #[default]
    Aggregate,
    /// Identifiers are raster layers, evaluated per pixel
    Pixel,
}

/// Short variable name standing for a raster layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaInput {
    pub variable: String,
    pub raster: String,
}

fn default_output_statistics() -> Vec<Statistic> {
    vec![Statistic::Mean]
}

/// User-defined derived field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaDefinition {
    /// Output column name (pixel mode: column prefix)
    pub name: String,
    pub expression: String,
    #[serde(default)]
    pub mode: FormulaMode,
    #[serde(default)]
    pub inputs: Vec<FormulaInput>,
    /// Pixel mode only
    #[serde(default = "default_output_statistics")]
    pub output_statistics: Vec<Statistic>,
}

impl FormulaDefinition {
    pub fn aggregate(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            mode: FormulaMode::Aggregate,
            inputs: Vec::new(),
            output_statistics: default_output_statistics(),
        }
    }

    pub fn pixel(
        name: impl Into<String>,
        expression: impl Into<String>,
        output_statistics: Vec<Statistic>,
    ) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            mode: FormulaMode::Pixel,
            inputs: Vec::new(),
            output_statistics,
        }
    }

    pub fn with_input(mut self, variable: impl Into<String>, raster: impl Into<String>) -> Self {
        self.inputs.push(FormulaInput {
            variable: variable.into(),
            raster: raster.into(),
        });
        self
    }

    /// Output columns, known without parsing the expression
    pub fn output_columns(&self) -> Vec<String> {
        match self.mode {
            FormulaMode::Aggregate => vec![self.name.clone()],
            FormulaMode::Pixel => self
                .output_statistics
                .iter()
                .map(|s| format!("{}_{}", self.name, s.name()))
                .collect(),
        }
    }
}

/// Outcome of a pixel-mode evaluation over one zone
#[derive(Debug, Clone, PartialEq)]
pub struct PixelEvaluation {
    /// `({name}_{stat}, value)` in output-statistic order
    pub values: Vec<(String, Option<f64>)>,
    /// Pixels whose evaluation failed and were dropped
    pub failed: usize,
    pub first_error: Option<EvaluationError>,
}

/// A parsed and statically checked [`FormulaDefinition`]
#[derive(Debug, Clone)]
pub struct CompiledFormula {
    definition: FormulaDefinition,
    formula: Formula,
    /// (identifier, resolved column or layer) for every referenced identifier
    bindings: Vec<(String, String)>,
    layers: Vec<String>,
}

impl CompiledFormula {
    pub fn new(definition: FormulaDefinition) -> Result<Self, FormulaError> {
        let formula = Formula::parse(&definition.expression)?;
        formula.validate()?;

        let bindings: Vec<(String, String)> = formula
            .variables()
            .into_iter()
            .map(|ident| {
                let target = match definition.mode {
                    FormulaMode::Aggregate => column_for(&definition.inputs, &ident),
                    FormulaMode::Pixel => layer_for(&definition.inputs, &ident),
                };
                (ident, target)
            })
            .collect();

        let mut layers: Vec<String> = Vec::new();
        if definition.mode == FormulaMode::Pixel {
            for (_, layer) in &bindings {
                if !layers.contains(layer) {
                    layers.push(layer.clone());
                }
            }
        }

        Ok(Self {
            definition,
            formula,
            bindings,
            layers,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn mode(&self) -> FormulaMode {
        self.definition.mode
    }

    pub fn definition(&self) -> &FormulaDefinition {
        &self.definition
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    /// Columns (aggregate mode) or layers (pixel mode) the formula reads
    pub fn references(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for (_, target) in &self.bindings {
            if !out.contains(&target.as_str()) {
                out.push(target);
            }
        }
        out
    }

    /// Layers a pixel-mode formula reads; stacks passed to
    /// [`evaluate_pixels`](Self::evaluate_pixels) follow this order
    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    /// Columns this formula adds to the output table
    pub fn output_columns(&self) -> Vec<String> {
        self.definition.output_columns()
    }

    /// Evaluate against a zone's already computed columns
    pub fn evaluate_aggregate<F>(&self, column: F) -> Result<f64, EvaluationError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        self.formula.evaluate(|ident| {
            let target = self
                .bindings
                .iter()
                .find(|(i, _)| i == ident)
                .map(|(_, t)| t.as_str())
                .unwrap_or(ident);
            column(target)
        })
    }

    /// Evaluate per pixel and reduce with the output statistics
    pub fn evaluate_pixels<I>(&self, stacks: I, weighted: bool) -> PixelEvaluation
    where
        I: IntoIterator<Item = PixelStack>,
    {
        let slots: Vec<(&str, usize)> = self
            .bindings
            .iter()
            .filter_map(|(ident, layer)| {
                self.layers
                    .iter()
                    .position(|l| l == layer)
                    .map(|i| (ident.as_str(), i))
            })
            .collect();

        let mut failed = 0;
        let mut first_error = None;
        let mut samples = Vec::new();
        for stack in stacks {
            let result = self.formula.evaluate(|ident| {
                slots
                    .iter()
                    .find(|(i, _)| *i == ident)
                    .and_then(|&(_, idx)| stack.values.get(idx).copied())
            });
            match result {
                Ok(value) => samples.push(PixelSample {
                    value,
                    weight: stack.weight,
                }),
                Err(e) => {
                    failed += 1;
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        let stats = &self.definition.output_statistics;
        let result = aggregate(samples, stats, weighted);
        let values = stats
            .iter()
            .map(|&s| (format!("{}_{}", self.definition.name, s.name()), result.get(s)))
            .collect();

        PixelEvaluation {
            values,
            failed,
            first_error,
        }
    }
}

/// `{VAR}_{stat}` -> `{raster}_{stat}` through the longest matching alias
fn column_for(inputs: &[FormulaInput], ident: &str) -> String {
    inputs
        .iter()
        .filter_map(|input| {
            ident
                .strip_prefix(input.variable.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .filter(|stat| !stat.is_empty())
                .map(|stat| (input.variable.len(), format!("{}_{}", input.raster, stat)))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, column)| column)
        .unwrap_or_else(|| ident.to_string())
}

fn layer_for(inputs: &[FormulaInput], ident: &str) -> String {
    inputs
        .iter()
        .find(|input| input.variable == ident)
        .map(|input| input.raster.clone())
        .unwrap_or_else(|| ident.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    fn eval_with(source: &str, vars: &[(&str, f64)]) -> Result<f64, EvaluationError> {
        let map: HashMap<&str, f64> = vars.iter().copied().collect();
        Formula::parse(source).unwrap().evaluate(|k| map.get(k).copied())
    }

    #[test]
    fn test_arithmetic() {
        assert_relative_eq!(eval_with("2 + 3 * 4", &[]).unwrap(), 14.0);
        assert_relative_eq!(eval_with("(2 + 3) * 4", &[]).unwrap(), 20.0);
        assert_relative_eq!(eval_with("2 ^ 3 ^ 2", &[]).unwrap(), 512.0);
        assert_relative_eq!(eval_with("-2 ^ 2", &[]).unwrap(), -4.0);
        assert_relative_eq!(eval_with("2 ^ -1", &[]).unwrap(), 0.5);
        assert_relative_eq!(eval_with("10 - 4 - 3", &[]).unwrap(), 3.0);
    }

    #[test]
    fn test_functions() {
        assert_relative_eq!(eval_with("abs(-3) + sqrt(16)", &[]).unwrap(), 7.0);
        assert_relative_eq!(eval_with("min(3, 1, 2) + max(4, 5)", &[]).unwrap(), 6.0);
        assert_relative_eq!(eval_with("pow(2, 10)", &[]).unwrap(), 1024.0);
        assert_relative_eq!(eval_with("log(100, 10)", &[]).unwrap(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(eval_with("log10(1000) + floor(2.7) + ceil(0.2)", &[]).unwrap(), 6.0, epsilon = 1e-12);
        assert_relative_eq!(eval_with("round(2.5) + round(3.5)", &[]).unwrap(), 6.0);
        assert_relative_eq!(eval_with("round(3.14159, 2)", &[]).unwrap(), 3.14);
        assert_relative_eq!(eval_with("exp(0)", &[]).unwrap(), 1.0);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval_with("a / 0", &[("a", 1.0)]), Err(EvaluationError::DivisionByZero));
        assert_eq!(eval_with("a / (b - b)", &[("a", 1.0), ("b", 2.0)]), Err(EvaluationError::DivisionByZero));
    }

    #[test]
    fn test_evaluation_errors() {
        assert_eq!(eval_with("x + 1", &[]), Err(EvaluationError::MissingField("x".into())));
        assert_eq!(
            eval_with("eval(1)", &[]),
            Err(EvaluationError::UnknownFunction("eval".into()))
        );
        assert!(matches!(eval_with("pow(2)", &[]), Err(EvaluationError::Arity { found: 1, .. })));
        assert_eq!(eval_with("sqrt(-1)", &[]), Err(EvaluationError::NonFinite));
        assert_eq!(eval_with("log(0)", &[]), Err(EvaluationError::NonFinite));
    }

    #[test]
    fn test_validate_is_static() {
        let f = Formula::parse("open(path) + 1").unwrap();
        assert_eq!(f.validate(), Err(EvaluationError::UnknownFunction("open".into())));
        let f = Formula::parse("max() + 1").unwrap();
        assert!(matches!(f.validate(), Err(EvaluationError::Arity { .. })));
        assert_eq!(Formula::parse("a + max(b, c)").unwrap().validate(), Ok(()));
    }

    #[test]
    fn test_variables_in_first_use_order() {
        let f: Formula = "B_mean - A_mean + B_mean / C".parse().unwrap();
        assert_eq!(f.variables(), vec!["B_mean", "A_mean", "C"]);
    }

    #[test]
    fn test_aggregate_aliases() {
        let def = FormulaDefinition::aggregate("ndvi_change", "(B_mean - A_mean) / A_mean")
            .with_input("A", "ndvi_2020")
            .with_input("B", "ndvi_2024");
        let compiled = CompiledFormula::new(def).unwrap();
        assert_eq!(compiled.references(), vec!["ndvi_2024_mean", "ndvi_2020_mean"]);
        assert_eq!(compiled.output_columns(), vec!["ndvi_change"]);

        let columns: HashMap<&str, f64> = [("ndvi_2020_mean", 0.5), ("ndvi_2024_mean", 0.6)]
            .into_iter()
            .collect();
        let v = compiled.evaluate_aggregate(|c| columns.get(c).copied()).unwrap();
        assert_relative_eq!(v, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_direct_column_names() {
        let compiled =
            CompiledFormula::new(FormulaDefinition::aggregate("ratio", "dem_max / dem_min")).unwrap();
        let v = compiled
            .evaluate_aggregate(|c| match c {
                "dem_max" => Some(300.0),
                "dem_min" => Some(100.0),
                _ => None,
            })
            .unwrap();
        assert_relative_eq!(v, 3.0);
    }

    #[test]
    fn test_pixel_mode() {
        let def = FormulaDefinition::pixel(
            "ndvi",
            "(N - R) / (N + R)",
            vec![Statistic::Mean, Statistic::Count, Statistic::Max],
        )
        .with_input("N", "nir")
        .with_input("R", "red");
        let compiled = CompiledFormula::new(def).unwrap();
        assert_eq!(compiled.layers(), &["nir".to_string(), "red".to_string()]);
        assert_eq!(compiled.output_columns(), vec!["ndvi_mean", "ndvi_count", "ndvi_max"]);

        let stacks = vec![
            PixelStack { values: vec![0.8, 0.2], weight: 1.0 },
            PixelStack { values: vec![0.6, 0.2], weight: 1.0 },
            // 0 / 0 is dropped
            PixelStack { values: vec![0.0, 0.0], weight: 1.0 },
        ];
        let out = compiled.evaluate_pixels(stacks, false);
        assert_eq!(out.failed, 1);
        assert_eq!(out.first_error, Some(EvaluationError::DivisionByZero));
        assert_eq!(out.values[0].0, "ndvi_mean");
        assert_relative_eq!(out.values[0].1.unwrap(), 0.55, epsilon = 1e-12);
        assert_eq!(out.values[1].1, Some(2.0));
        assert_relative_eq!(out.values[2].1.unwrap(), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_compile_rejects_unknown_function() {
        let err = CompiledFormula::new(FormulaDefinition::aggregate("x", "system(1)")).unwrap_err();
        assert!(matches!(err, FormulaError::Evaluation(EvaluationError::UnknownFunction(_))));
        let err = CompiledFormula::new(FormulaDefinition::aggregate("x", "1 +")).unwrap_err();
        assert!(matches!(err, FormulaError::Parse { .. }));
    }

    #[test]
    fn test_definition_serde_defaults() {
        let def: FormulaDefinition =
            serde_json::from_str(r#"{"name": "f", "expression": "a * 2"}"#).unwrap();
        assert_eq!(def.mode, FormulaMode::Aggregate);
        assert_eq!(def.output_statistics, vec![Statistic::Mean]);
    }
}
