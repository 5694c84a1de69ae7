//! Builtin query functions.

use super::parser::Input;
use super::result::UqiResult;
use crate::compare::{read_f32, read_f64, read_unsigned};
use crate::error::{CoreError, CoreResult};
use crate::types::{KeyType, RecordType};
use std::cmp::Ordering;

/// Shape of the entries a function is fed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Source {
    pub key_type: KeyType,
    pub record_type: RecordType,
    pub input: Input,
}

impl Source {
    fn pick<'b>(&self, key: &'b [u8], record: &'b [u8]) -> &'b [u8] {
        match self.input {
            Input::Key | Input::KeyAndRecord => key,
            Input::Record => record,
        }
    }

    /// Value type of the stream; numeric functions accept only numbers.
    fn numeric(&self, function: &str) -> CoreResult<RecordType> {
        let value_type = match self.input {
            Input::Key => self.key_type.value_type(),
            Input::Record => self.record_type,
            Input::KeyAndRecord => {
                return Err(CoreError::invalid_parameter(format!(
                    "{function} takes either $key or $record"
                )))
            }
        };
        if value_type == RecordType::Binary {
            return Err(CoreError::invalid_parameter(format!(
                "{function} requires a numeric stream"
            )));
        }
        Ok(value_type)
    }
}

/// A function consuming entries in key order.
pub(crate) trait Aggregate {
    /// Consumes one entry; returns `false` once no more entries are needed.
    fn visit(&mut self, key: &[u8], record: &[u8]) -> CoreResult<bool>;

    fn finish(self: Box<Self>) -> UqiResult;
}

const BUILTINS: [&str; 8] = ["count", "sum", "average", "min", "max", "top", "bottom", "value"];

/// Returns true if `name` (lower-cased) is a builtin function.
pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Resolves a builtin function by its lower-cased name.
pub(crate) fn builtin(
    name: &str,
    source: Source,
    limit: Option<u32>,
) -> CoreResult<Box<dyn Aggregate>> {
    let aggregate: Box<dyn Aggregate> = match name {
        "count" => Box::new(Count(0)),
        "sum" => Box::new(Sum::new(source, source.numeric("SUM")?, false)),
        "average" => Box::new(Sum::new(source, source.numeric("AVERAGE")?, true)),
        "min" => Box::new(MinMax::new(source, source.numeric("MIN")?, Ordering::Less)),
        "max" => Box::new(MinMax::new(source, source.numeric("MAX")?, Ordering::Greater)),
        "top" => Box::new(Extremes::new(source, source.numeric("TOP")?, limit, Ordering::Greater)),
        "bottom" => Box::new(Extremes::new(source, source.numeric("BOTTOM")?, limit, Ordering::Less)),
        "value" => Box::new(Values::new(source, limit)),
        other => return Err(CoreError::plugin_not_found(other)),
    };
    Ok(aggregate)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(u64),
    Real(f64),
}

impl Number {
    fn decode(value_type: RecordType, bytes: &[u8]) -> Self {
        match value_type {
            RecordType::Real32 => Self::Real(f64::from(read_f32(bytes))),
            RecordType::Real64 => Self::Real(read_f64(bytes)),
            _ => Self::Int(read_unsigned(bytes)),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(value) => value as f64,
            Self::Real(value) => value,
        }
    }

    fn compare(self, other: Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(&b),
            (a, b) => a.as_f64().total_cmp(&b.as_f64()),
        }
    }
}

struct Count(u64);

impl Aggregate for Count {
    fn visit(&mut self, _: &[u8], _: &[u8]) -> CoreResult<bool> {
        self.0 += 1;
        Ok(true)
    }

    fn finish(self: Box<Self>) -> UqiResult {
        let mut result = UqiResult::new(KeyType::Binary, RecordType::UInt64);
        result.push(b"COUNT".to_vec(), self.0.to_le_bytes().to_vec());
        result
    }
}

/// `SUM` and `AVERAGE`.
struct Sum {
    source: Source,
    value_type: RecordType,
    average: bool,
    int: u64,
    real: f64,
    count: u64,
}

impl Sum {
    fn new(source: Source, value_type: RecordType, average: bool) -> Self {
        Self {
            source,
            value_type,
            average,
            int: 0,
            real: 0.0,
            count: 0,
        }
    }
}

impl Aggregate for Sum {
    fn visit(&mut self, key: &[u8], record: &[u8]) -> CoreResult<bool> {
        match Number::decode(self.value_type, self.source.pick(key, record)) {
            Number::Int(value) => self.int = self.int.wrapping_add(value),
            Number::Real(value) => self.real += value,
        }
        self.count += 1;
        Ok(true)
    }

    fn finish(self: Box<Self>) -> UqiResult {
        if self.average {
            let total = if self.value_type.is_real() {
                self.real
            } else {
                self.int as f64
            };
            let average = if self.count == 0 {
                0.0
            } else {
                total / self.count as f64
            };
            let mut result = UqiResult::new(KeyType::Binary, RecordType::Real64);
            result.push(b"AVERAGE".to_vec(), average.to_le_bytes().to_vec());
            return result;
        }

        if self.value_type.is_real() {
            let mut result = UqiResult::new(KeyType::Binary, RecordType::Real64);
            result.push(b"SUM".to_vec(), self.real.to_le_bytes().to_vec());
            result
        } else {
            let mut result = UqiResult::new(KeyType::Binary, RecordType::UInt64);
            result.push(b"SUM".to_vec(), self.int.to_le_bytes().to_vec());
            result
        }
    }
}

/// `MIN` and `MAX`: the first entry holding the extreme value.
struct MinMax {
    source: Source,
    value_type: RecordType,
    wanted: Ordering,
    best: Option<(Number, Vec<u8>, Vec<u8>)>,
}

impl MinMax {
    fn new(source: Source, value_type: RecordType, wanted: Ordering) -> Self {
        Self {
            source,
            value_type,
            wanted,
            best: None,
        }
    }
}

impl Aggregate for MinMax {
    fn visit(&mut self, key: &[u8], record: &[u8]) -> CoreResult<bool> {
        let value = Number::decode(self.value_type, self.source.pick(key, record));
        let better = match &self.best {
            Some((best, _, _)) => value.compare(*best) == self.wanted,
            None => true,
        };
        if better {
            self.best = Some((value, key.to_vec(), record.to_vec()));
        }
        Ok(true)
    }

    fn finish(self: Box<Self>) -> UqiResult {
        let mut result = UqiResult::new(self.source.key_type, self.source.record_type);
        if let Some((_, key, record)) = self.best {
            result.push(key, record);
        }
        result
    }
}

/// `TOP` and `BOTTOM`: the N most extreme values, most extreme first.
struct Extremes {
    source: Source,
    value_type: RecordType,
    limit: usize,
    wanted: Ordering,
    values: Vec<(Number, Vec<u8>)>,
}

impl Extremes {
    fn new(source: Source, value_type: RecordType, limit: Option<u32>, wanted: Ordering) -> Self {
        Self {
            source,
            value_type,
            limit: limit.map_or(1, |limit| limit as usize),
            wanted,
            values: Vec::new(),
        }
    }
}

impl Aggregate for Extremes {
    fn visit(&mut self, key: &[u8], record: &[u8]) -> CoreResult<bool> {
        if self.limit == 0 {
            return Ok(false);
        }
        let bytes = self.source.pick(key, record);
        let value = Number::decode(self.value_type, bytes);
        // ties keep the earlier entry in front
        let position = self
            .values
            .partition_point(|(kept, _)| kept.compare(value) != self.wanted.reverse());
        if position < self.limit {
            self.values.insert(position, (value, bytes.to_vec()));
            self.values.truncate(self.limit);
        }
        Ok(true)
    }

    fn finish(self: Box<Self>) -> UqiResult {
        let mut result = match self.source.input {
            Input::Record => UqiResult::new(KeyType::Binary, self.source.record_type),
            _ => UqiResult::new(self.source.key_type, RecordType::Binary),
        };
        for (_, bytes) in self.values {
            match self.source.input {
                Input::Record => result.push(Vec::new(), bytes),
                _ => result.push(bytes, Vec::new()),
            }
        }
        result
    }
}

/// `VALUE`: streams the selected columns, bounded by `LIMIT`.
struct Values {
    result: UqiResult,
    input: Input,
    limit: Option<usize>,
}

impl Values {
    fn new(source: Source, limit: Option<u32>) -> Self {
        Self {
            result: UqiResult::new(source.key_type, source.record_type),
            input: source.input,
            limit: limit.map(|limit| limit as usize),
        }
    }

    fn is_full(&self) -> bool {
        self.limit
            .is_some_and(|limit| self.result.row_count() >= limit)
    }
}

impl Aggregate for Values {
    fn visit(&mut self, key: &[u8], record: &[u8]) -> CoreResult<bool> {
        if self.is_full() {
            return Ok(false);
        }
        match self.input {
            Input::Key => self.result.push(key.to_vec(), Vec::new()),
            Input::Record => self.result.push(Vec::new(), record.to_vec()),
            Input::KeyAndRecord => self.result.push(key.to_vec(), record.to_vec()),
        }
        Ok(!self.is_full())
    }

    fn finish(self: Box<Self>) -> UqiResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn source(key_type: KeyType, record_type: RecordType, input: Input) -> Source {
        Source {
            key_type,
            record_type,
            input,
        }
    }

    fn run(aggregate: &mut dyn Aggregate, entries: &[(u32, u64)]) {
        for (key, record) in entries {
            if !aggregate
                .visit(&key.to_le_bytes(), &record.to_le_bytes())
                .unwrap()
            {
                break;
            }
        }
    }

    const ENTRIES: &[(u32, u64)] = &[(1, 30), (2, 10), (3, 50), (4, 10), (5, 40)];

    #[test]
    fn sum_and_average() {
        let numbers = source(KeyType::UInt32, RecordType::UInt64, Input::Record);
        let mut sum = builtin("sum", numbers, None).unwrap();
        run(sum.as_mut(), ENTRIES);
        let result = sum.finish();
        assert_eq!(result.record_type, RecordType::UInt64);
        assert_eq!(result.record_u64(0), Some(140));

        let keys = source(KeyType::UInt32, RecordType::UInt64, Input::Key);
        let mut average = builtin("average", keys, None).unwrap();
        run(average.as_mut(), ENTRIES);
        assert_eq!(average.finish().record_f64(0), Some(3.0));
    }

    #[test]
    fn min_max_keep_the_first_extreme_entry() {
        let records = source(KeyType::UInt32, RecordType::UInt64, Input::Record);
        let mut min = builtin("min", records, None).unwrap();
        run(min.as_mut(), ENTRIES);
        let result = min.finish();
        assert_eq!(result.key_u64(0), Some(2));
        assert_eq!(result.record_u64(0), Some(10));

        let mut max = builtin("max", records, None).unwrap();
        run(max.as_mut(), ENTRIES);
        assert_eq!(max.finish().key_u64(0), Some(3));
    }

    #[test]
    fn top_and_bottom_order() {
        let records = source(KeyType::UInt32, RecordType::UInt64, Input::Record);
        let mut top = builtin("top", records, Some(3)).unwrap();
        run(top.as_mut(), ENTRIES);
        let top = top.finish();
        let values: Vec<_> = (0..top.row_count()).filter_map(|i| top.record_u64(i)).collect();
        assert_eq!(values, vec![50, 40, 30]);

        let mut bottom = builtin("bottom", records, Some(2)).unwrap();
        run(bottom.as_mut(), ENTRIES);
        let bottom = bottom.finish();
        let values: Vec<_> = (0..bottom.row_count())
            .filter_map(|i| bottom.record_u64(i))
            .collect();
        assert_eq!(values, vec![10, 10]);

        let mut single = builtin("top", records, None).unwrap();
        run(single.as_mut(), ENTRIES);
        assert_eq!(single.finish().row_count(), 1);
    }

    #[test]
    fn value_respects_limit() {
        let both = source(KeyType::UInt32, RecordType::UInt64, Input::KeyAndRecord);
        let mut values = builtin("value", both, Some(2)).unwrap();
        run(values.as_mut(), ENTRIES);
        let result = values.finish();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.key_u64(1), Some(2));
        assert_eq!(result.record_u64(1), Some(10));
    }

    #[test]
    fn numeric_functions_reject_binary_streams() {
        let binary = source(KeyType::Binary, RecordType::Binary, Input::Key);
        for name in ["sum", "average", "min", "max", "top", "bottom"] {
            let err = builtin(name, binary, None).err().unwrap();
            assert_eq!(err.code(), ErrorCode::InvParameter, "{name}");
        }
        assert!(builtin("count", binary, None).is_ok());
        assert!(builtin("value", binary, None).is_ok());

        let both = source(KeyType::UInt32, RecordType::UInt32, Input::KeyAndRecord);
        assert_eq!(
            builtin("sum", both, None).err().unwrap().code(),
            ErrorCode::InvParameter
        );
        assert_eq!(
            builtin("median", binary, None).err().unwrap().code(),
            ErrorCode::PluginNotFound
        );
    }

    #[test]
    fn real_sums() {
        let reals = source(KeyType::Real32, RecordType::Binary, Input::Key);
        let mut sum = builtin("sum", reals, None).unwrap();
        for value in [1.5f32, 2.25, -0.75] {
            sum.visit(&value.to_le_bytes(), b"").unwrap();
        }
        let result = sum.finish();
        assert_eq!(result.record_type, RecordType::Real64);
        assert_eq!(result.record_f64(0), Some(3.0));
    }
}
