use crate::{
    Command, CompileScope, Connection, CursorBehavior, DataType, Driver, Error, FromRow,
    IsolationLevel, MappingSettings, Materializer, Member, MemberKind, MemoryCursor, Nested,
    NestedMember, Record, Result, RowsAffected, Schema, ShapeId, Value, compile_nested,
    compile_record,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Scripted backend: query texts map to in-memory result sets, texts starting
/// with `FAIL` fail, everything the connections do is recorded.
#[derive(Default, Clone)]
pub(crate) struct Script {
    results: Arc<Mutex<HashMap<String, MemoryCursor>>>,
    log: Arc<Mutex<Vec<String>>>,
    concurrent: bool,
}

impl Script {
    pub(crate) fn new() -> Self {
        Self::default()
    }
    pub(crate) fn result(self, text: &str, cursor: MemoryCursor) -> Self {
        self.results.lock().unwrap().insert(text.into(), cursor);
        self
    }
    pub(crate) fn numbers(self, text: &str, values: &[i64]) -> Self {
        self.result(
            text,
            MemoryCursor::new().result_set(
                [("n", DataType::Int64)],
                values.iter().map(|v| vec![Value::Int64(Some(*v))]),
            ),
        )
    }
    /// Connections report support for concurrent cursors.
    pub(crate) fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }
    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }
}

impl Driver for Script {
    type Connection = ScriptConnection;
    const NAME: &'static str = "script";

    fn connect(&self, url: &str) -> Result<ScriptConnection> {
        if url == "unreachable" {
            return Err(Error::msg("no route to host"));
        }
        self.record("connect");
        Ok(ScriptConnection {
            script: self.clone(),
            open: true,
            transaction: false,
        })
    }
}

pub(crate) struct ScriptConnection {
    script: Script,
    open: bool,
    transaction: bool,
}

impl ScriptConnection {
    fn check(&self, command: &Command) -> Result<()> {
        if !self.open {
            return Err(Error::msg("The connection is closed"));
        }
        if command.text.starts_with("FAIL") {
            return Err(Error::msg(format!("Scripted failure: {}", command.text)));
        }
        Ok(())
    }
}

impl Connection for ScriptConnection {
    type Cursor = MemoryCursor;

    fn open(&mut self) -> Result<()> {
        self.script.record("open");
        self.open = true;
        Ok(())
    }
    fn close(&mut self) -> Result<()> {
        self.script.record("close");
        self.open = false;
        Ok(())
    }
    fn is_open(&self) -> bool {
        self.open
    }
    fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        self.script.record(format!("begin {isolation:?}"));
        self.transaction = true;
        Ok(())
    }
    fn commit(&mut self) -> Result<()> {
        self.script.record("commit");
        self.transaction = false;
        Ok(())
    }
    fn rollback(&mut self) -> Result<()> {
        self.script.record("rollback");
        self.transaction = false;
        Ok(())
    }
    fn in_transaction(&self) -> bool {
        self.transaction
    }
    fn execute_reader(
        &mut self,
        command: &Command,
        _behavior: CursorBehavior,
    ) -> Result<MemoryCursor> {
        self.check(command)?;
        self.script.record(format!("read {}", command.text));
        Ok(self
            .script
            .results
            .lock()
            .unwrap()
            .get(&command.text)
            .cloned()
            .unwrap_or_default())
    }
    fn execute_non_query(&mut self, command: &Command) -> Result<RowsAffected> {
        self.check(command)?;
        self.script.record(format!("execute {}", command.text));
        Ok(RowsAffected {
            rows_affected: 1,
            last_affected_id: None,
        })
    }
    fn supports_concurrent_cursors(&self) -> bool {
        self.script.concurrent
    }
}

macro_rules! value_member {
    ($record:ty, $field:ident: $ty:ty, $column:literal) => {
        $crate::Member {
            field: stringify!($field),
            column: $column,
            kind: $crate::MemberKind::Value($crate::ValueMember {
                data_type: $crate::member_data_type::<$ty>,
                accepts: <$ty as $crate::AsValue>::accepts,
                assign: |r: &mut $record, v: $crate::Value| {
                    $crate::assign_member(&mut r.$field, v)
                },
            }),
        }
    };
}

#[derive(Default, Debug, Clone, PartialEq)]
pub(crate) struct Address {
    pub(crate) street: String,
    pub(crate) city: String,
}

impl Record for Address {
    fn construct() -> Option<Self> {
        Some(Self::default())
    }
    fn members() -> &'static [Member<Self>] {
        static MEMBERS: [Member<Address>; 2] = [
            value_member!(Address, street: String, "street"),
            value_member!(Address, city: String, "city"),
        ];
        &MEMBERS
    }
}

impl Nested for Address {
    type Inner = Self;
    fn wrap(inner: Option<Self>) -> Option<Self> {
        inner
    }
}

impl FromRow for Address {
    fn compile(schema: &Schema, settings: &MappingSettings) -> Result<Materializer<Self>> {
        compile_record(schema, settings)
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
pub(crate) struct Person {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) address: Option<Address>,
}

impl Record for Person {
    fn construct() -> Option<Self> {
        Some(Self::default())
    }
    fn members() -> &'static [Member<Self>] {
        static MEMBERS: [Member<Person>; 3] = [
            value_member!(Person, id: i64, "id"),
            value_member!(Person, name: String, "name"),
            Member {
                field: "address",
                column: "address",
                kind: MemberKind::Nested(NestedMember {
                    shape: ShapeId::of::<Address>,
                    compile: |schema: &Schema,
                              settings: &MappingSettings,
                              scope: &mut CompileScope| {
                        compile_nested::<Person, Option<Address>>(
                            schema,
                            settings,
                            scope,
                            "address",
                            "address",
                            |r: &mut Person, v: Option<Address>| r.address = v,
                        )
                    },
                }),
            },
        ];
        &MEMBERS
    }
}

impl FromRow for Person {
    fn compile(schema: &Schema, settings: &MappingSettings) -> Result<Materializer<Self>> {
        compile_record(schema, settings)
    }
}

/// `Id, Name` rows.
pub(crate) fn people(rows: &[(i64, &str)]) -> MemoryCursor {
    MemoryCursor::new().result_set(
        [("Id", DataType::Int64), ("Name", DataType::Varchar)],
        rows.iter().map(|(id, name)| {
            vec![Value::Int64(Some(*id)), Value::Varchar(Some(name.to_string()))]
        }),
    )
}
