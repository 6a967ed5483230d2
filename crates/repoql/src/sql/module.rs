//! Adapter exposing a [`Table`] to SQLite as an eponymous virtual table.
//!
//! Every table is registered under its own name and can be used either as
//! a plain table (`SELECT * FROM files`) or as a table-valued function
//! whose arguments bind to the hidden columns in declaration order
//! (`SELECT * FROM files('acme/widgets', 'v1.2.0')`).

use std::marker::PhantomData;
use std::os::raw::c_int;
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::vtab::{
    eponymous_only_module, Context, IndexConstraintOp, IndexInfo, VTab, VTabConnection,
    VTabCursor, Values,
};
use rusqlite::{ffi, Connection, Error};

use crate::error::RepoqlError;
use crate::tables::{ColumnDef, Constraint, EntityIterator, OrderBy, Table, TableContext};

/// What a registered module is built from.
#[derive(Clone)]
pub struct Registration {
    pub table: Arc<dyn Table>,
    pub context: Arc<TableContext>,
}

/// Registers `table` on `conn` under [`Table::name`]. Errors the table
/// raises are recorded on `context` before SQLite sees them.
pub(crate) fn register(
    conn: &Connection,
    table: Arc<dyn Table>,
    context: Arc<TableContext>,
) -> rusqlite::Result<()> {
    let name = table.name();
    conn.create_module(
        name,
        eponymous_only_module::<EntityTab>(),
        Some(Registration { table, context }),
    )
}

/// `CREATE TABLE` statement declared to SQLite for a column list.
pub(crate) fn declare_schema(columns: &[ColumnDef]) -> String {
    let columns = columns
        .iter()
        .map(|c| {
            let mut decl = format!("\"{}\" {}", c.name, c.ty.sql());
            if c.hidden {
                decl.push_str(" HIDDEN");
            }
            if c.not_null {
                decl.push_str(" NOT NULL");
            }
            decl
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE x({columns})")
}

// idx_num layout: bits 0..15 hold the set of hidden columns whose equality
// constraint was pushed down (their values arrive in ascending column order);
// bit 15 marks a consumed ORDER BY, bit 16 its direction, and the bits from
// 17 up its column.
const PUSHDOWN_BITS: u32 = 15;
const ORDER_FLAG: c_int = 1 << 15;
const ORDER_DESC: c_int = 1 << 16;
const ORDER_SHIFT: u32 = 17;

/// A scan plan chosen in `best_index` and replayed in `filter`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Plan {
    pushed: u16,
    order: Option<OrderBy>,
}

impl Plan {
    fn push(&mut self, column: usize) -> bool {
        if column >= PUSHDOWN_BITS as usize || self.pushed & (1 << column) != 0 {
            return false;
        }
        self.pushed |= 1 << column;
        true
    }

    fn columns(&self) -> impl Iterator<Item = usize> + '_ {
        (0..PUSHDOWN_BITS as usize).filter(move |c| self.pushed & (1 << c) != 0)
    }

    fn encode(&self) -> c_int {
        let mut idx = c_int::from(self.pushed);
        if let Some(order) = self.order {
            idx |= ORDER_FLAG | ((order.column as c_int) << ORDER_SHIFT);
            if order.desc {
                idx |= ORDER_DESC;
            }
        }
        idx
    }

    fn decode(idx: c_int) -> Self {
        let order = (idx & ORDER_FLAG != 0).then(|| OrderBy {
            column: (idx >> ORDER_SHIFT) as usize,
            desc: idx & ORDER_DESC != 0,
        });
        Self {
            pushed: (idx & ((1 << PUSHDOWN_BITS) - 1)) as u16,
            order,
        }
    }
}

#[repr(C)]
pub struct EntityTab {
    /// Must be first.
    base: ffi::sqlite3_vtab,
    table: Arc<dyn Table>,
    context: Arc<TableContext>,
}

unsafe impl<'vtab> VTab<'vtab> for EntityTab {
    type Aux = Registration;
    type Cursor = EntityTabCursor<'vtab>;

    fn connect(
        _db: &mut VTabConnection,
        aux: Option<&Self::Aux>,
        _args: &[&[u8]],
    ) -> rusqlite::Result<(String, Self)> {
        let Registration { table, context } = aux
            .cloned()
            .ok_or_else(|| Error::ModuleError("virtual table registered without a table".into()))?;
        let schema = declare_schema(table.columns());
        Ok((
            schema,
            EntityTab {
                base: ffi::sqlite3_vtab::default(),
                table,
                context,
            },
        ))
    }

    fn best_index(&self, info: &mut IndexInfo) -> rusqlite::Result<()> {
        let columns = self.table.columns();
        let mut plan = Plan::default();
        let mut usages = Vec::new();

        for (i, constraint) in info.constraints().enumerate() {
            let Ok(column) = usize::try_from(constraint.column()) else {
                continue;
            };
            let hidden = columns.get(column).is_some_and(|c| c.hidden);
            let equality = matches!(
                constraint.operator(),
                IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_EQ
            );
            if !hidden || !equality {
                continue;
            }
            // A table-function argument that is not usable in this plan
            // (bound to a later join term) makes the whole plan unusable;
            // SQLite then tries another join order.
            if !constraint.is_usable() {
                return Err(Error::SqliteFailure(
                    ffi::Error::new(ffi::SQLITE_CONSTRAINT),
                    None,
                ));
            }
            if plan.push(column) {
                usages.push((i, column));
            }
        }

        usages.sort_by_key(|&(_, column)| column);
        for (argv, (i, _)) in usages.iter().enumerate() {
            let mut usage = info.constraint_usage(*i);
            usage.set_argv_index(argv as c_int + 1);
            usage.set_omit(true);
        }

        let order_bys: Vec<(c_int, bool)> = info
            .order_bys()
            .map(|o| (o.column(), o.is_order_by_desc()))
            .collect();
        if let [(column, desc)] = order_bys[..] {
            let honored = usize::try_from(column)
                .ok()
                .filter(|&c| columns.get(c).is_some_and(|def| def.sort.honors(desc)));
            if let Some(column) = honored {
                plan.order = Some(OrderBy { column, desc });
                info.set_order_by_consumed(true);
            }
        }

        info.set_idx_num(plan.encode());
        info.set_estimated_cost(if usages.is_empty() {
            1_000_000.0
        } else {
            1_000.0 / usages.len() as f64
        });
        Ok(())
    }

    fn open(&'vtab mut self) -> rusqlite::Result<EntityTabCursor<'vtab>> {
        Ok(EntityTabCursor {
            base: ffi::sqlite3_vtab_cursor::default(),
            table: self.table.clone(),
            context: self.context.clone(),
            iter: None,
            row_id: 0,
            phantom: PhantomData,
        })
    }
}

#[repr(C)]
pub struct EntityTabCursor<'vtab> {
    /// Must be first.
    base: ffi::sqlite3_vtab_cursor,
    table: Arc<dyn Table>,
    context: Arc<TableContext>,
    iter: Option<EntityIterator>,
    row_id: i64,
    phantom: PhantomData<&'vtab EntityTab>,
}

impl EntityTabCursor<'_> {
    fn fail(&self, err: RepoqlError) -> Error {
        Error::ModuleError(self.context.record_failure(err))
    }

    fn close_iter(&mut self) {
        if let Some(mut iter) = self.iter.take() {
            iter.close();
        }
    }

    fn constraints(&self, plan: &Plan, args: &Values<'_>) -> rusqlite::Result<Vec<Constraint>> {
        let columns = self.table.columns();
        plan.columns()
            .enumerate()
            .map(|(arg, column)| {
                let value: Value = args.get(arg)?;
                if matches!(value, Value::Blob(_) | Value::Real(_)) {
                    return Err(self.fail(RepoqlError::UnsupportedConstraint {
                        table: self.table.name(),
                        column: columns[column].name.to_string(),
                        reason: "expected a text value".to_string(),
                    }));
                }
                Ok(Constraint { column, value })
            })
            .collect()
    }
}

unsafe impl VTabCursor for EntityTabCursor<'_> {
    fn filter(
        &mut self,
        idx_num: c_int,
        _idx_str: Option<&str>,
        args: &Values<'_>,
    ) -> rusqlite::Result<()> {
        self.close_iter();
        self.row_id = 0;

        let plan = Plan::decode(idx_num);
        let constraints = self.constraints(&plan, args)?;
        let order: Vec<OrderBy> = plan.order.into_iter().collect();

        let iter = self
            .table
            .open(&constraints, &order)
            .map_err(|e| self.fail(e))?;
        self.iter = Some(iter);
        self.next()
    }

    fn next(&mut self) -> rusqlite::Result<()> {
        let Some(iter) = self.iter.as_mut() else {
            return Ok(());
        };
        match iter.next() {
            Ok(true) => {
                self.row_id += 1;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn eof(&self) -> bool {
        self.iter.as_ref().map_or(true, |iter| !iter.is_positioned())
    }

    fn column(&self, ctx: &mut Context, i: c_int) -> rusqlite::Result<()> {
        let Some(iter) = self.iter.as_ref() else {
            return Err(self.fail(RepoqlError::NoCurrentRow(self.table.name())));
        };
        let index = usize::try_from(i).map_err(|_| {
            self.fail(RepoqlError::ColumnOutOfRange {
                table: self.table.name(),
                index: usize::MAX,
            })
        })?;
        let value = iter.column(index).map_err(|e| self.fail(e))?;
        ctx.set_result(&value)
    }

    fn rowid(&self) -> rusqlite::Result<i64> {
        Ok(self.row_id)
    }
}

impl Drop for EntityTabCursor<'_> {
    fn drop(&mut self) {
        self.close_iter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::ColumnType;

    #[test]
    fn test_declare_schema_marks_hidden_columns() {
        let columns = [
            ColumnDef::visible("path", ColumnType::Text),
            ColumnDef::visible("contents", ColumnType::Blob),
            ColumnDef::hidden("repository", ColumnType::Text),
        ];
        assert_eq!(
            declare_schema(&columns),
            "CREATE TABLE x(\"path\" TEXT, \"contents\" BLOB, \"repository\" TEXT HIDDEN NOT NULL)"
        );
    }

    #[test]
    fn test_plan_encoding_preserves_pushdown_and_order() {
        let mut plan = Plan::default();
        assert!(plan.push(4));
        assert!(plan.push(3));
        assert!(!plan.push(3), "a column is pushed once");
        plan.order = Some(OrderBy {
            column: 8,
            desc: true,
        });

        let decoded = Plan::decode(plan.encode());
        assert_eq!(decoded, plan);
        assert_eq!(decoded.columns().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_plan_without_order() {
        let mut plan = Plan::default();
        plan.push(10);
        let decoded = Plan::decode(plan.encode());
        assert_eq!(decoded.order, None);
        assert_eq!(decoded.columns().collect::<Vec<_>>(), vec![10]);
    }

    #[test]
    fn test_plan_rejects_columns_outside_bitmask() {
        let mut plan = Plan::default();
        assert!(!plan.push(PUSHDOWN_BITS as usize));
        assert_eq!(plan.encode(), 0);
    }
}
