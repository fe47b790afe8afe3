//! Table catalog: the text format stored in the metadata page's `tables`
//! field.
//!
//! One line per table: `name\troot_page\tpk_type\tcol:type[:len],...`. A
//! small hand-written scanner parses it -- the core has no dependency on
//! any parser crate that might sit above it.

use std::fmt::Write as _;

use crate::column::DataType;
use crate::error::{Error, Result};
use crate::page::{KeyType, PageNumber};

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub root_page: PageNumber,
    pub key_type: KeyType,
    pub pk_data_type: DataType,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub tables: Vec<TableInfo>,
}

impl Catalog {
    pub fn find(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut TableInfo> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn insert(&mut self, table: TableInfo) -> Result<()> {
        if self.find(&table.name).is_some() {
            return Err(Error::Config(format!("table '{}' already exists", table.name)));
        }
        self.tables.push(table);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        let before = self.tables.len();
        self.tables.retain(|t| t.name != name);
        if self.tables.len() == before {
            return Err(Error::Config(format!("table '{}' does not exist", name)));
        }
        Ok(())
    }

    pub fn format(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let _ = write!(
                out,
                "{}\t{}\t{}",
                table.name,
                table.root_page,
                data_type_tag(&table.pk_data_type)
            );
            for col in &table.columns {
                let _ = write!(out, "\t{}:{}", col.name, data_type_tag(&col.data_type));
            }
            out.push('\n');
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut tables = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let name = fields
                .next()
                .ok_or_else(|| Error::Corruption("catalog line missing table name".into()))?
                .to_string();
            let root_page: PageNumber = fields
                .next()
                .ok_or_else(|| Error::Corruption("catalog line missing root page".into()))?
                .parse()
                .map_err(|_| Error::Corruption(format!("catalog line for '{}' has a bad root page", name)))?;
            let pk_tag = fields
                .next()
                .ok_or_else(|| Error::Corruption("catalog line missing pk type".into()))?;
            let pk_data_type = parse_data_type_tag(pk_tag)?;
            let key_type = pk_data_type
                .key_type()
                .ok_or_else(|| Error::Corruption(format!("'{}' cannot be a primary key type", pk_tag)))?;

            let mut columns = Vec::new();
            for field in fields {
                let (col_name, tag) = field
                    .split_once(':')
                    .ok_or_else(|| Error::Corruption(format!("malformed column field '{}'", field)))?;
                columns.push(ColumnDef {
                    name: col_name.to_string(),
                    data_type: parse_data_type_tag(tag)?,
                });
            }

            tables.push(TableInfo {
                name,
                root_page,
                key_type,
                pk_data_type,
                columns,
            });
        }
        Ok(Catalog { tables })
    }
}

fn data_type_tag(dt: &DataType) -> String {
    match dt {
        DataType::Int => "int".to_string(),
        DataType::SmallInt => "smallint".to_string(),
        DataType::TinyInt => "tinyint".to_string(),
        DataType::BigInt => "bigint".to_string(),
        DataType::Float => "float".to_string(),
        DataType::Double => "double".to_string(),
        DataType::VarChar(len) => format!("varchar{}", len),
        DataType::Text => "text".to_string(),
        DataType::Binary => "binary".to_string(),
        DataType::DateTime => "datetime".to_string(),
        DataType::Timestamp => "timestamp".to_string(),
        DataType::Boolean => "boolean".to_string(),
    }
}

fn parse_data_type_tag(tag: &str) -> Result<DataType> {
    if let Some(len) = tag.strip_prefix("varchar") {
        let len: u16 = len
            .parse()
            .map_err(|_| Error::Corruption(format!("bad varchar length in '{}'", tag)))?;
        return Ok(DataType::VarChar(len));
    }
    Ok(match tag {
        "int" => DataType::Int,
        "smallint" => DataType::SmallInt,
        "tinyint" => DataType::TinyInt,
        "bigint" => DataType::BigInt,
        "float" => DataType::Float,
        "double" => DataType::Double,
        "text" => DataType::Text,
        "binary" => DataType::Binary,
        "datetime" => DataType::DateTime,
        "timestamp" => DataType::Timestamp,
        "boolean" => DataType::Boolean,
        other => return Err(Error::Corruption(format!("unknown column type tag '{}'", other))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_roundtrips_through_text() {
        let mut catalog = Catalog::default();
        catalog
            .insert(TableInfo {
                name: "devices".to_string(),
                root_page: 1,
                key_type: KeyType::Text,
                pk_data_type: DataType::VarChar(2023),
                columns: vec![ColumnDef {
                    name: "datetime".to_string(),
                    data_type: DataType::Int,
                }],
            })
            .unwrap();

        let text = catalog.format();
        let parsed = Catalog::parse(&text).unwrap();
        assert_eq!(parsed.tables.len(), 1);
        let table = &parsed.tables[0];
        assert_eq!(table.name, "devices");
        assert_eq!(table.root_page, 1);
        assert!(matches!(table.pk_data_type, DataType::VarChar(2023)));
        assert_eq!(table.columns.len(), 1);
    }

    #[test]
    fn duplicate_table_name_is_rejected() {
        let mut catalog = Catalog::default();
        let table = TableInfo {
            name: "t".to_string(),
            root_page: 1,
            key_type: KeyType::Int,
            pk_data_type: DataType::Int,
            columns: vec![],
        };
        catalog.insert(table.clone()).unwrap();
        assert!(catalog.insert(table).is_err());
    }
}
