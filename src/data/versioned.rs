//! 乐观并发控制：带版本号的记录更新。
//!
//! 更新语句同时以主键和当前版本号为条件，成功时在同一条语句里把版本号加一。
//! 没有命中任何行时无法区分“记录已删除”和“版本已被并发修改”，两者都返回
//! [`DataError::EditConflict`]，由调用方决定重新读取后重试还是放弃。

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::DataError;

/// 带版本号的实体
pub trait Versioned: Clone + Send + Sync {
    const TABLE: &'static str;

    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
    fn version(&self) -> i32;
    fn set_version(&mut self, version: i32);

    /// 写入业务字段的赋值子句，例如 `title = $n`；不包括 id 与 version
    fn push_assignments(&self, set: &mut Separated<'_, '_, Postgres, &'static str>);
}

fn update_query<T: Versioned>(record: &T) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", T::TABLE));
    let mut set = query.separated(", ");
    record.push_assignments(&mut set);
    set.push("version = version + 1");

    query
        .push(" WHERE id = ")
        .push_bind(record.id())
        .push(" AND version = ")
        .push_bind(record.version())
        .push(" RETURNING version");
    query
}

/// 以 `record.version()` 作为期望版本更新记录，成功后回写新版本号
pub async fn update<T: Versioned>(pool: &PgPool, record: &mut T) -> Result<(), DataError> {
    let mut query = update_query(record);
    let version: Option<i32> = query
        .build_query_scalar()
        .fetch_optional(pool)
        .await?;

    match version {
        Some(version) => {
            record.set_version(version);
            Ok(())
        }
        None => Err(DataError::EditConflict),
    }
}

/// 内存中的版本化表，语义与 [`update`] 一致
pub struct MemoryTable<T> {
    rows: Mutex<Table<T>>,
}

struct Table<T> {
    next_id: i64,
    rows: HashMap<i64, T>,
}

impl<T> Default for MemoryTable<T> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(Table {
                next_id: 1,
                rows: HashMap::new(),
            }),
        }
    }
}

impl<T: Versioned> MemoryTable<T> {
    fn with_rows<R>(&self, f: impl FnOnce(&mut Table<T>) -> R) -> R {
        let mut table = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut table)
    }

    /// 分配 id，版本号从 1 开始
    pub fn insert(&self, record: &mut T) {
        self.with_rows(|table| {
            record.set_id(table.next_id);
            record.set_version(1);
            table.next_id += 1;
            table.rows.insert(record.id(), record.clone());
        })
    }

    /// 插入前检查唯一性等约束，`check` 返回错误时不写入
    pub fn insert_checked(
        &self,
        record: &mut T,
        check: impl FnOnce(&T, &HashMap<i64, T>) -> Result<(), DataError>,
    ) -> Result<(), DataError> {
        self.with_rows(|table| {
            check(record, &table.rows)?;
            record.set_id(table.next_id);
            record.set_version(1);
            table.next_id += 1;
            table.rows.insert(record.id(), record.clone());
            Ok(())
        })
    }

    pub fn get(&self, id: i64) -> Option<T> {
        self.with_rows(|table| table.rows.get(&id).cloned())
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.with_rows(|table| table.rows.values().find(|row| predicate(row)).cloned())
    }

    pub fn all(&self) -> Vec<T> {
        self.with_rows(|table| table.rows.values().cloned().collect())
    }

    pub fn update(&self, record: &mut T) -> Result<(), DataError> {
        self.update_checked(record, |_, _| Ok(()))
    }

    /// 约束检查与版本比较在同一把锁内完成
    pub fn update_checked(
        &self,
        record: &mut T,
        check: impl FnOnce(&T, &HashMap<i64, T>) -> Result<(), DataError>,
    ) -> Result<(), DataError> {
        self.with_rows(|table| {
            check(record, &table.rows)?;
            match table.rows.get_mut(&record.id()) {
                Some(current) if current.version() == record.version() => {
                    record.set_version(record.version() + 1);
                    *current = record.clone();
                    Ok(())
                }
                _ => Err(DataError::EditConflict),
            }
        })
    }

    pub fn delete(&self, id: i64) -> Result<(), DataError> {
        self.with_rows(|table| {
            table
                .rows
                .remove(&id)
                .map(|_| ())
                .ok_or(DataError::RecordNotFound)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: i64,
        body: String,
        version: i32,
    }

    impl Versioned for Note {
        const TABLE: &'static str = "notes";

        fn id(&self) -> i64 {
            self.id
        }
        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
        fn version(&self) -> i32 {
            self.version
        }
        fn set_version(&mut self, version: i32) {
            self.version = version;
        }
        fn push_assignments(&self, set: &mut Separated<'_, '_, Postgres, &'static str>) {
            set.push("body = ").push_bind_unseparated(self.body.clone());
        }
    }

    fn note(body: &str) -> Note {
        Note {
            id: 0,
            body: body.into(),
            version: 0,
        }
    }

    #[test]
    fn insert_starts_at_version_one() {
        let table = MemoryTable::default();
        let mut first = note("a");
        let mut second = note("b");
        table.insert(&mut first);
        table.insert(&mut second);
        assert_eq!((first.id, first.version), (1, 1));
        assert_eq!((second.id, second.version), (2, 1));
    }

    #[test]
    fn stale_writer_gets_edit_conflict_and_can_retry_after_reread() {
        let table = MemoryTable::default();
        let mut original = note("draft");
        table.insert(&mut original);
        table.update(&mut original).unwrap();
        table.update(&mut original).unwrap();
        assert_eq!(original.version, 3);

        // A 和 B 都读到版本 3
        let mut a = table.get(original.id).unwrap();
        let mut b = table.get(original.id).unwrap();

        a.body = "from a".into();
        table.update(&mut a).unwrap();
        assert_eq!(a.version, 4);

        b.body = "from b".into();
        assert!(matches!(table.update(&mut b), Err(DataError::EditConflict)));
        assert_eq!(table.get(original.id).unwrap().body, "from a");

        let mut b = table.get(original.id).unwrap();
        b.body = "from b".into();
        table.update(&mut b).unwrap();
        assert_eq!(b.version, 5);
        assert_eq!(table.get(original.id).unwrap(), b);
    }

    #[test]
    fn updating_a_deleted_record_is_an_edit_conflict() {
        let table = MemoryTable::default();
        let mut record = note("gone");
        table.insert(&mut record);
        table.delete(record.id).unwrap();
        assert!(matches!(table.update(&mut record), Err(DataError::EditConflict)));
        assert!(matches!(table.delete(record.id), Err(DataError::RecordNotFound)));
    }

    #[test]
    fn failed_check_leaves_the_row_and_version_untouched() {
        let table = MemoryTable::default();
        let mut record = note("kept");
        table.insert(&mut record);

        record.body = "rejected".into();
        let result = table.update_checked(&mut record, |_, _| Err(DataError::DuplicateEmail));
        assert!(matches!(result, Err(DataError::DuplicateEmail)));
        assert_eq!(record.version, 1);
        assert_eq!(table.get(record.id).unwrap().body, "kept");
    }

    #[test]
    fn update_statement_is_conditioned_on_id_and_version() {
        let record = Note {
            id: 9,
            body: "text".into(),
            version: 3,
        };
        let query = update_query(&record);
        assert_eq!(
            query.sql(),
            "UPDATE notes SET body = $1, version = version + 1 WHERE id = $2 AND version = $3 RETURNING version"
        );
    }
}
