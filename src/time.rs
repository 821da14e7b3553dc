//! Temporal relations and arithmetic shared by both evaluators.
//!
//! The formulas are written once against [`TimeAlgebra`]; the relational
//! compiler instantiates them with SQL condition builders and the in-memory
//! evaluator with three-valued booleans. Both therefore accept and reject
//! exactly the same operand shapes.

use crate::error::{QueryError, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Earliest instant `minDateTime()` stands for.
pub const MIN_DATETIME_TEXT: &str = "-4000-01-01T00:00:00Z";
/// Latest instant `maxDateTime()` stands for.
pub const MAX_DATETIME_TEXT: &str = "9999-12-31T23:59:59.999Z";

pub fn min_datetime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(-4000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn max_datetime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .map(|t| t + Duration::milliseconds(999))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Primitive instant comparisons and boolean connectives.
pub trait TimeAlgebra {
    type Instant: Clone;
    type Truth;

    fn lt(&self, a: &Self::Instant, b: &Self::Instant) -> Self::Truth;
    fn le(&self, a: &Self::Instant, b: &Self::Instant) -> Self::Truth;
    fn eq(&self, a: &Self::Instant, b: &Self::Instant) -> Self::Truth;
    fn and(&self, a: Self::Truth, b: Self::Truth) -> Self::Truth;
    fn or(&self, a: Self::Truth, b: Self::Truth) -> Self::Truth;
    fn not(&self, a: Self::Truth) -> Self::Truth;
}

/// An instant (start == end) or a half-open interval `[start, end)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Span<I> {
    pub start: I,
    pub end: I,
    pub interval: bool,
}

impl<I: Clone> Span<I> {
    pub fn instant(at: I) -> Self {
        Self {
            start: at.clone(),
            end: at,
            interval: false,
        }
    }

    pub fn interval(start: I, end: I) -> Self {
        Self {
            start,
            end,
            interval: true,
        }
    }
}

/// Relations between two time values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Before,
    After,
    Meets,
    During,
    Overlaps,
    Starts,
    Finishes,
}

impl Relation {
    /// The relation to use with the operands swapped.
    pub fn mirrored(self) -> Relation {
        match self {
            Relation::Gt => Relation::Lt,
            Relation::Lt => Relation::Gt,
            Relation::Ge => Relation::Le,
            Relation::Le => Relation::Ge,
            Relation::Before => Relation::After,
            Relation::After => Relation::Before,
            other => other,
        }
    }
}

fn lt<A: TimeAlgebra>(alg: &A, l: &Span<A::Instant>, r: &Span<A::Instant>) -> A::Truth {
    if l.interval {
        alg.le(&l.end, &r.start)
    } else {
        alg.lt(&l.start, &r.start)
    }
}

fn eq<A: TimeAlgebra>(alg: &A, l: &Span<A::Instant>, r: &Span<A::Instant>) -> A::Truth {
    alg.and(alg.eq(&l.start, &r.start), alg.eq(&l.end, &r.end))
}

fn contains<A: TimeAlgebra>(alg: &A, outer: &Span<A::Instant>, inner: &Span<A::Instant>) -> A::Truth {
    if !outer.interval {
        return eq(alg, outer, inner);
    }
    let from = alg.le(&outer.start, &inner.start);
    if inner.interval {
        alg.and(from, alg.le(&inner.end, &outer.end))
    } else {
        alg.and(from, alg.lt(&inner.start, &outer.end))
    }
}

fn overlaps<A: TimeAlgebra>(alg: &A, l: &Span<A::Instant>, r: &Span<A::Instant>) -> A::Truth {
    match (l.interval, r.interval) {
        (false, false) => alg.eq(&l.start, &r.start),
        (true, false) => contains(alg, l, r),
        (false, true) => contains(alg, r, l),
        (true, true) => alg.and(alg.lt(&l.start, &r.end), alg.lt(&r.start, &l.end)),
    }
}

/// Evaluate `l <relation> r`.
pub fn relate<A: TimeAlgebra>(
    alg: &A,
    relation: Relation,
    l: &Span<A::Instant>,
    r: &Span<A::Instant>,
) -> Result<A::Truth> {
    Ok(match relation {
        Relation::Eq => eq(alg, l, r),
        Relation::Ne => alg.not(eq(alg, l, r)),
        Relation::Lt | Relation::Before => lt(alg, l, r),
        Relation::Gt | Relation::After => lt(alg, r, l),
        Relation::Le => alg.or(lt(alg, l, r), eq(alg, l, r)),
        Relation::Ge => alg.or(lt(alg, r, l), eq(alg, l, r)),
        Relation::Meets => alg.or(alg.eq(&l.end, &r.start), alg.eq(&r.end, &l.start)),
        Relation::Overlaps => overlaps(alg, l, r),
        Relation::Starts => alg.eq(&l.start, &r.start),
        Relation::Finishes => alg.eq(&l.end, &r.end),
        Relation::During => {
            if !r.interval {
                return Err(QueryError::InvalidArgument(
                    "second parameter of 'during' must be an interval".to_string(),
                ));
            }
            contains(alg, r, l)
        }
    })
}

// --- Arithmetic ---

/// Shape of an arithmetic operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Instant,
    Interval,
    Duration,
    Number,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// How a time arithmetic expression is computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plan {
    /// Move an instant or interval by a duration. `negate` subtracts.
    Shift {
        interval: bool,
        time_on_left: bool,
        negate: bool,
    },
    /// Instant minus instant.
    Elapsed,
    /// Duration plus or minus duration.
    Combine { negate: bool },
    /// Duration times or divided by a number.
    Scale { duration_on_left: bool, divide: bool },
}

/// Decide how `left op right` is computed, with at least one side time-like.
pub fn plan_arithmetic(op: ArithmeticOp, left: Shape, right: Shape) -> Result<Plan> {
    use Shape::*;
    let unsupported = || {
        QueryError::Unsupported(format!(
            "{:?} between {:?} and {:?}",
            op, left, right
        ))
    };
    match op {
        ArithmeticOp::Div if right != Number => Err(QueryError::Unsupported(
            "can not divide by a time value".to_string(),
        )),
        ArithmeticOp::Sub if left == Number => Err(QueryError::Unsupported(
            "can not subtract a time value from a number".to_string(),
        )),
        ArithmeticOp::Add | ArithmeticOp::Sub => {
            let negate = op == ArithmeticOp::Sub;
            match (left, right) {
                (Instant, Duration) | (Interval, Duration) => Ok(Plan::Shift {
                    interval: left == Interval,
                    time_on_left: true,
                    negate,
                }),
                (Duration, Instant) | (Duration, Interval) if !negate => Ok(Plan::Shift {
                    interval: right == Interval,
                    time_on_left: false,
                    negate,
                }),
                (Instant, Instant) if negate => Ok(Plan::Elapsed),
                (Duration, Duration) => Ok(Plan::Combine { negate }),
                _ => Err(unsupported()),
            }
        }
        ArithmeticOp::Mul => match (left, right) {
            (Duration, Number) => Ok(Plan::Scale {
                duration_on_left: true,
                divide: false,
            }),
            (Number, Duration) => Ok(Plan::Scale {
                duration_on_left: false,
                divide: false,
            }),
            _ => Err(unsupported()),
        },
        ArithmeticOp::Div => match left {
            Duration => Ok(Plan::Scale {
                duration_on_left: true,
                divide: true,
            }),
            _ => Err(unsupported()),
        },
    }
}

// --- Literal formats ---

/// Parse an ISO 8601 duration of days, hours, minutes and seconds.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let err = |msg: &str| QueryError::parse(text, msg.to_string());
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let rest = rest.strip_prefix('P').ok_or_else(|| err("duration must start with 'P'"))?;
    let mut total = Duration::zero();
    let mut in_time = false;
    let mut number = String::new();
    let mut seen = false;
    for ch in rest.chars() {
        match ch {
            'T' if !in_time => in_time = true,
            '0'..='9' | '.' => number.push(ch),
            unit => {
                if number.is_empty() {
                    return Err(err("missing number in duration"));
                }
                let value: f64 = number.parse().map_err(|_| err("bad number in duration"))?;
                let seconds = match (unit, in_time) {
                    ('D', false) => value * 86_400.0,
                    ('W', false) => value * 604_800.0,
                    ('H', true) => value * 3_600.0,
                    ('M', true) => value * 60.0,
                    ('S', true) => value,
                    ('Y', false) | ('M', false) => {
                        return Err(err("years and months have no fixed length"))
                    }
                    _ => return Err(err("unknown duration unit")),
                };
                let millis = (seconds * 1000.0).round();
                if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
                    return Err(err("duration out of range"));
                }
                total = Duration::try_milliseconds(millis as i64)
                    .and_then(|part| total.checked_add(&part))
                    .ok_or_else(|| err("duration out of range"))?;
                number.clear();
                seen = true;
            }
        }
    }
    if !number.is_empty() || !seen {
        return Err(err("incomplete duration"));
    }
    Ok(if negative { -total } else { total })
}

/// Render a duration as ISO 8601 (`P1DT2H`).
pub fn format_duration(duration: Duration) -> String {
    let mut millis = duration.num_milliseconds();
    let sign = if millis < 0 { "-" } else { "" };
    millis = millis.abs();
    let days = millis / 86_400_000;
    millis %= 86_400_000;
    let hours = millis / 3_600_000;
    millis %= 3_600_000;
    let minutes = millis / 60_000;
    millis %= 60_000;
    let mut out = format!("{}P", sign);
    if days > 0 {
        out.push_str(&format!("{}D", days));
    }
    if hours > 0 || minutes > 0 || millis > 0 || days == 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes > 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if millis > 0 || (hours == 0 && minutes == 0) {
            if millis % 1000 == 0 {
                out.push_str(&format!("{}S", millis / 1000));
            } else {
                out.push_str(&format!("{}.{:03}S", millis / 1000, millis % 1000));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two-valued algebra over plain integers.
    struct Ints;

    impl TimeAlgebra for Ints {
        type Instant = i64;
        type Truth = bool;

        fn lt(&self, a: &i64, b: &i64) -> bool {
            a < b
        }
        fn le(&self, a: &i64, b: &i64) -> bool {
            a <= b
        }
        fn eq(&self, a: &i64, b: &i64) -> bool {
            a == b
        }
        fn and(&self, a: bool, b: bool) -> bool {
            a && b
        }
        fn or(&self, a: bool, b: bool) -> bool {
            a || b
        }
        fn not(&self, a: bool) -> bool {
            !a
        }
    }

    fn rel(r: Relation, l: Span<i64>, rr: Span<i64>) -> bool {
        relate(&Ints, r, &l, &rr).unwrap()
    }

    #[test]
    fn test_interval_comparisons() {
        let a = Span::interval(0, 10);
        let b = Span::interval(10, 20);
        assert!(rel(Relation::Lt, a.clone(), b.clone()));
        assert!(rel(Relation::Gt, b.clone(), a.clone()));
        assert!(rel(Relation::Meets, a.clone(), b.clone()));
        assert!(!rel(Relation::Overlaps, a.clone(), b.clone()));
        assert!(rel(Relation::Overlaps, a.clone(), Span::interval(5, 15)));
        assert!(rel(Relation::Le, a.clone(), a.clone()));
        assert!(!rel(Relation::Ne, a.clone(), a));
    }

    #[test]
    fn test_instant_against_interval() {
        let i = Span::interval(0, 10);
        assert!(rel(Relation::During, Span::instant(5), i.clone()));
        assert!(!rel(Relation::During, Span::instant(10), i.clone()));
        assert!(rel(Relation::Before, Span::instant(-1), i.clone()));
        assert!(rel(Relation::Gt, Span::instant(10), i.clone()));
        assert!(rel(Relation::Starts, Span::instant(0), i));
    }

    #[test]
    fn test_during_requires_interval() {
        let err = relate(&Ints, Relation::During, &Span::instant(1), &Span::instant(1));
        assert!(matches!(err, Err(QueryError::InvalidArgument(_))));
    }

    #[test]
    fn test_mirrored_comparison_is_equivalent() {
        let l = Span::instant(3);
        let r = Span::interval(0, 10);
        for relation in [Relation::Gt, Relation::Ge, Relation::Lt, Relation::Le, Relation::Eq] {
            assert_eq!(
                rel(relation, l.clone(), r.clone()),
                rel(relation.mirrored(), r.clone(), l.clone())
            );
        }
    }

    #[test]
    fn test_arithmetic_plans() {
        use ArithmeticOp::*;
        use Shape::*;
        assert!(matches!(
            plan_arithmetic(Div, Number, Duration),
            Err(QueryError::Unsupported(_))
        ));
        assert!(matches!(
            plan_arithmetic(Sub, Number, Instant),
            Err(QueryError::Unsupported(_))
        ));
        assert_eq!(plan_arithmetic(Sub, Instant, Instant).unwrap(), Plan::Elapsed);
        assert_eq!(
            plan_arithmetic(Add, Duration, Interval).unwrap(),
            Plan::Shift {
                interval: true,
                time_on_left: false,
                negate: false
            }
        );
        assert!(plan_arithmetic(Mul, Instant, Number).is_err());
        assert!(plan_arithmetic(Div, Duration, Number).is_ok());
    }

    #[test]
    fn test_durations() {
        let d = parse_duration("P1DT2H30M").unwrap();
        assert_eq!(d, Duration::minutes(26 * 60 + 30));
        assert_eq!(format_duration(d), "P1DT2H30M");
        assert_eq!(parse_duration("-PT1.5S").unwrap(), Duration::milliseconds(-1500));
        assert_eq!(format_duration(Duration::zero()), "PT0S");
        assert!(parse_duration("P1Y").is_err());
        assert!(parse_duration("1D").is_err());
    }

    #[test]
    fn test_duration_overflow_is_a_parse_error() {
        for text in ["P1DT99999999999999999H", "P99999999999999D"] {
            let err = parse_duration(text).unwrap_err();
            assert!(matches!(err, QueryError::Parse { .. }), "{} -> {:?}", text, err);
        }
        // Two parts that fit alone but not together.
        assert!(parse_duration("P106751991166DT48H").is_err());
    }

    #[test]
    fn test_sentinels() {
        assert!(min_datetime() < max_datetime());
        assert_eq!(max_datetime().to_rfc3339(), "9999-12-31T23:59:59.999+00:00");
    }
}
