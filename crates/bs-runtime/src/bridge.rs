use std::collections::BTreeMap;

use bs_core::ScriptValue;
use mlua::{Error as LuaError, Lua, MultiValue, Result as LuaResult, Table, Value};

const MAX_DEPTH: usize = 32;

pub(crate) fn to_lua(lua: &Lua, value: &ScriptValue) -> LuaResult<Value> {
    match value {
        ScriptValue::Nil => Ok(Value::Nil),
        ScriptValue::Bool(value) => Ok(Value::Boolean(*value)),
        ScriptValue::Number(number) => match value.as_integer() {
            Some(integer) => Ok(Value::Integer(integer)),
            None => Ok(Value::Number(*number)),
        },
        ScriptValue::String(value) => Ok(Value::String(lua.create_string(value)?)),
        ScriptValue::Array(values) => {
            let table = lua.create_table()?;
            for (index, entry) in values.iter().enumerate() {
                table.raw_set(index + 1, to_lua(lua, entry)?)?;
            }
            Ok(Value::Table(table))
        }
        ScriptValue::Map(entries) => {
            let table = lua.create_table()?;
            for (key, entry) in entries {
                table.raw_set(key.as_str(), to_lua(lua, entry)?)?;
            }
            Ok(Value::Table(table))
        }
    }
}

pub(crate) fn from_lua(value: Value) -> LuaResult<ScriptValue> {
    from_lua_at(value, 0)
}

/// Collapses a multi-value into one: none is nil, one is itself, more become an array.
pub(crate) fn from_multi(values: MultiValue) -> LuaResult<ScriptValue> {
    let mut converted = args_from_multi(values)?;
    match converted.len() {
        0 => Ok(ScriptValue::Nil),
        1 => Ok(converted.remove(0)),
        _ => Ok(ScriptValue::Array(converted)),
    }
}

pub(crate) fn args_from_multi(values: MultiValue) -> LuaResult<Vec<ScriptValue>> {
    values.into_iter().map(from_lua).collect()
}

fn from_lua_at(value: Value, depth: usize) -> LuaResult<ScriptValue> {
    if depth > MAX_DEPTH {
        return Err(LuaError::runtime(
            "value is nested too deeply to cross the host boundary",
        ));
    }

    match value {
        Value::Nil => Ok(ScriptValue::Nil),
        Value::Boolean(value) => Ok(ScriptValue::Bool(value)),
        Value::Integer(value) => Ok(ScriptValue::Number(value as f64)),
        Value::Number(value) => Ok(ScriptValue::Number(value)),
        Value::String(value) => Ok(ScriptValue::String(value.to_str()?.to_string())),
        Value::Table(table) => table_to_value(table, depth),
        other => Err(LuaError::runtime(format!(
            "{} values cannot cross the host boundary",
            other.type_name()
        ))),
    }
}

fn table_to_value(table: Table, depth: usize) -> LuaResult<ScriptValue> {
    let sequence_len = table.raw_len();
    let mut entries = Vec::new();
    for pair in table.pairs::<Value, Value>() {
        entries.push(pair?);
    }

    if sequence_len > 0 && entries.len() == sequence_len {
        let mut values = Vec::with_capacity(sequence_len);
        for index in 1..=sequence_len {
            let entry = table.raw_get::<Value>(index)?;
            values.push(from_lua_at(entry, depth + 1)?);
        }
        return Ok(ScriptValue::Array(values));
    }

    let mut map = BTreeMap::new();
    for (key, entry) in entries {
        let key = match key {
            Value::String(key) => key.to_str()?.to_string(),
            Value::Integer(key) => key.to_string(),
            Value::Number(key) => key.to_string(),
            other => {
                return Err(LuaError::runtime(format!(
                    "table keys of type {} cannot cross the host boundary",
                    other.type_name()
                )))
            }
        };
        map.insert(key, from_lua_at(entry, depth + 1)?);
    }
    Ok(ScriptValue::Map(map))
}
