use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use schemadoc::{DocumentStore, SchemaConfig, SchemaLocator, Validator};

use super::mocks::{CountingAccess, CountingFetcher};

pub const CATALOG: &str = "https://raw.githubusercontent.com/zerocracy/datum";

pub const PERSON_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="person">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="name" minOccurs="0" maxOccurs="unbounded">
          <xs:complexType>
            <xs:simpleContent>
              <xs:extension base="xs:string">
                <xs:attribute name="id" type="xs:string"/>
              </xs:extension>
            </xs:simpleContent>
          </xs:complexType>
        </xs:element>
        <xs:element name="age" type="xs:nonNegativeInteger" minOccurs="0"/>
        <xs:element name="note" minOccurs="0">
          <xs:complexType mixed="true">
            <xs:sequence>
              <xs:element name="b" type="xs:string" minOccurs="0" maxOccurs="unbounded"/>
            </xs:sequence>
          </xs:complexType>
        </xs:element>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>
"#;

pub fn person_uri(version: &str) -> String {
    format!("{}/{}/xsd/person.xsd", CATALOG, version)
}

/// A store over `person.xml` in a fresh directory, with schemas served from memory
pub struct Fixture {
    pub dir: TempDir,
    pub fetcher: Arc<CountingFetcher>,
    pub access: CountingAccess,
    pub validator: Arc<Validator>,
}

impl Fixture {
    pub fn new() -> Self {
        let fetcher = Arc::new(
            CountingFetcher::new()
                .serve(&person_uri("0.23"), PERSON_XSD)
                .serve(&person_uri("0.24"), PERSON_XSD),
        );
        let locator = Arc::new(SchemaLocator::new(fetcher.clone()));
        Self {
            dir: TempDir::new().expect("temp dir"),
            fetcher,
            access: CountingAccess::new(),
            validator: Arc::new(Validator::new(locator)),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("person.xml")
    }

    pub fn store(&self) -> DocumentStore {
        self.store_at(&self.path(), "0.23")
    }

    pub fn store_with_version(&self, version: &str) -> DocumentStore {
        self.store_at(&self.path(), version)
    }

    pub fn store_at(&self, path: &Path, version: &str) -> DocumentStore {
        DocumentStore::new(path)
            .with_validator(self.validator.clone())
            .with_file_access(Arc::new(self.access.clone()))
            .with_schema_config(SchemaConfig {
                version: version.to_string(),
                catalog_url: CATALOG.to_string(),
            })
    }

    pub fn read(&self) -> String {
        std::fs::read_to_string(self.path()).expect("document readable")
    }
}
