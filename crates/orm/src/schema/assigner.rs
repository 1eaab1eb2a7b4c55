//! Column value conversion
//!
//! An [`Assigner`] converts between a field's in-memory representation and
//! the storage [`Value`] handed to the driver. Every column type gets a
//! [`ColumnAssigner`]; applications override the conversion for a type by
//! registering their own assigner with the registry.

use std::any::type_name;
use std::marker::PhantomData;

use super::access::Dyn;
use crate::backends::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::value::{ColumnType, Value, ValueKind};

/// Converts one field type to and from storage values
pub trait Assigner: Send + Sync {
    /// Name of the in-memory type, used in error messages
    fn type_name(&self) -> &'static str;

    /// Storage kind, used to derive column types
    fn kind(&self) -> ValueKind;

    fn nullable(&self) -> bool {
        false
    }

    fn to_storage(&self, value: &Dyn) -> OrmResult<Value>;

    /// Scan a storage value into `dest`
    fn from_storage(&self, raw: Value, dest: &mut Dyn) -> OrmResult<()>;

    /// Write an in-memory value directly; gives the value back when its type does not fit
    fn assign_direct(&self, dest: &mut Dyn, value: Box<Dyn>) -> Result<(), Box<Dyn>>;

    fn is_zero(&self, value: &Dyn) -> bool;

    /// Column type override
    fn sql_type(&self, _dialect: &dyn Dialect) -> Option<String> {
        None
    }

    fn sql_size(&self) -> Option<usize> {
        None
    }

    /// Placeholder override, e.g. a cast around the bound parameter
    fn bind_placeholder(&self, _dialect: &dyn Dialect, _position: usize) -> Option<String> {
        None
    }
}

/// Default assigner for any [`ColumnType`]
pub struct ColumnAssigner<T>(PhantomData<fn() -> T>);

impl<T> ColumnAssigner<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for ColumnAssigner<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn unaddressable<T>() -> OrmError {
    OrmError::Unaddressable(format!("value is not a {}", type_name::<T>()))
}

impl<T: ColumnType> Assigner for ColumnAssigner<T> {
    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn kind(&self) -> ValueKind {
        T::KIND
    }

    fn nullable(&self) -> bool {
        T::nullable()
    }

    fn to_storage(&self, value: &Dyn) -> OrmResult<Value> {
        value
            .downcast_ref::<T>()
            .map(ColumnType::to_value)
            .ok_or_else(unaddressable::<T>)
    }

    fn from_storage(&self, raw: Value, dest: &mut Dyn) -> OrmResult<()> {
        let slot = dest.downcast_mut::<T>().ok_or_else(unaddressable::<T>)?;
        *slot = T::from_value(raw)?;
        Ok(())
    }

    fn assign_direct(&self, dest: &mut Dyn, value: Box<Dyn>) -> Result<(), Box<Dyn>> {
        let Some(slot) = dest.downcast_mut::<T>() else {
            return Err(value);
        };
        let value = match value.downcast::<T>() {
            Ok(v) => *v,
            Err(other) => T::from_indirect(other)?,
        };
        *slot = value;
        Ok(())
    }

    fn is_zero(&self, value: &Dyn) -> bool {
        value.downcast_ref::<T>().map(ColumnType::is_zero).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_assignment_accepts_exact_and_inner_types() {
        let assigner = ColumnAssigner::<Option<i64>>::new();
        let mut slot: Option<i64> = None;

        assert!(assigner.assign_direct(&mut slot, Box::new(Some(4i64))).is_ok());
        assert_eq!(slot, Some(4));

        assert!(assigner.assign_direct(&mut slot, Box::new(9i64)).is_ok());
        assert_eq!(slot, Some(9));

        let rejected = assigner.assign_direct(&mut slot, Box::new("nine"));
        assert!(rejected.is_err());
        assert_eq!(slot, Some(9));
    }

    #[test]
    fn storage_round_trip_through_erased_slot() {
        let assigner = ColumnAssigner::<String>::new();
        let mut slot = String::new();
        assert!(assigner.is_zero(&slot));

        assigner.from_storage(Value::from("jinzhu"), &mut slot).unwrap();
        assert_eq!(slot, "jinzhu");
        assert_eq!(assigner.to_storage(&slot).unwrap(), Value::from("jinzhu"));
        assert!(!assigner.is_zero(&slot));
    }

    #[test]
    fn wrong_slot_is_unaddressable() {
        let assigner = ColumnAssigner::<i32>::new();
        let mut slot = String::new();
        let err = assigner.from_storage(Value::Int(1), &mut slot).unwrap_err();
        assert!(matches!(err, OrmError::Unaddressable(_)));
    }
}
