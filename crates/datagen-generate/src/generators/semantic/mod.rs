//! Faker-backed generators producing objects of related values
//! (`name.firstName`, `address.city`, ...).

use fake::faker::address::en::{
    BuildingNumber, CityName, CountryCode, CountryName, StateName, StreetName, ZipCode,
};
use fake::faker::company::en::{Buzzword, CatchPhrase, CompanyName, Industry, Profession};
use fake::faker::creditcard::en::CreditCardNumber;
use fake::faker::currency::en::{CurrencyCode, CurrencyName};
use fake::faker::finance::en::{Bic, Isin};
use fake::faker::internet::en::{DomainSuffix, FreeEmail, IPv4, SafeEmail, UserAgent, Username};
use fake::faker::name::en::{FirstName, LastName, Name, Suffix, Title};
use fake::faker::phone_number::en::{CellNumber, PhoneNumber};
use fake::{Dummy, Fake};
use rand::{Rng, RngCore};
use serde_json::{Map, Value};

use crate::errors::GenerationError;
use crate::generators::{FieldSupplier, Generator, GeneratorContext, GeneratorRegistry};
use crate::params::{ParamKind, ParamSpec, validate_params};

const PHONE_PARAMS: &[ParamSpec] = &[ParamSpec::new("format", ParamKind::String, false)];

pub fn register(registry: &mut GeneratorRegistry) {
    registry.register_generator(Box::new(ObjectGenerator {
        id: "name",
        suppliers: NAME_FIELDS,
    }));
    registry.register_generator(Box::new(ObjectGenerator {
        id: "internet",
        suppliers: INTERNET_FIELDS,
    }));
    registry.register_generator(Box::new(ObjectGenerator {
        id: "address",
        suppliers: ADDRESS_FIELDS,
    }));
    registry.register_generator(Box::new(ObjectGenerator {
        id: "company",
        suppliers: COMPANY_FIELDS,
    }));
    registry.register_generator(Box::new(ObjectGenerator {
        id: "country",
        suppliers: COUNTRY_FIELDS,
    }));
    registry.register_generator(Box::new(ObjectGenerator {
        id: "finance",
        suppliers: FINANCE_FIELDS,
    }));
    registry.register_generator(Box::new(PhoneGenerator));
}

fn text<F>(faker: F, rng: &mut dyn RngCore) -> Value
where
    String: Dummy<F>,
{
    Value::String(faker.fake_with_rng::<String, _>(rng))
}

fn first_name(rng: &mut dyn RngCore) -> Value {
    text(FirstName(), rng)
}
fn last_name(rng: &mut dyn RngCore) -> Value {
    text(LastName(), rng)
}
fn full_name(rng: &mut dyn RngCore) -> Value {
    text(Name(), rng)
}
fn name_title(rng: &mut dyn RngCore) -> Value {
    text(Title(), rng)
}
fn name_suffix(rng: &mut dyn RngCore) -> Value {
    text(Suffix(), rng)
}

fn email(rng: &mut dyn RngCore) -> Value {
    text(SafeEmail(), rng)
}
fn free_email(rng: &mut dyn RngCore) -> Value {
    text(FreeEmail(), rng)
}
fn username(rng: &mut dyn RngCore) -> Value {
    text(Username(), rng)
}
fn domain_name(rng: &mut dyn RngCore) -> Value {
    let label: String = LastName().fake_with_rng(rng);
    let suffix: String = DomainSuffix().fake_with_rng(rng);
    Value::String(format!("{}.{suffix}", label.to_ascii_lowercase()))
}
fn url(rng: &mut dyn RngCore) -> Value {
    match domain_name(rng) {
        Value::String(domain) => Value::String(format!("https://www.{domain}")),
        other => other,
    }
}
fn ip_address(rng: &mut dyn RngCore) -> Value {
    text(IPv4(), rng)
}
fn user_agent(rng: &mut dyn RngCore) -> Value {
    text(UserAgent(), rng)
}

fn street_address(rng: &mut dyn RngCore) -> Value {
    let number: String = BuildingNumber().fake_with_rng(rng);
    let street: String = StreetName().fake_with_rng(rng);
    Value::String(format!("{number} {street}"))
}
fn city(rng: &mut dyn RngCore) -> Value {
    text(CityName(), rng)
}
fn state(rng: &mut dyn RngCore) -> Value {
    text(StateName(), rng)
}
fn zip_code(rng: &mut dyn RngCore) -> Value {
    text(ZipCode(), rng)
}
fn country_name(rng: &mut dyn RngCore) -> Value {
    text(CountryName(), rng)
}
fn country_code(rng: &mut dyn RngCore) -> Value {
    text(CountryCode(), rng)
}
fn full_address(rng: &mut dyn RngCore) -> Value {
    let street = street_address(rng);
    let city: String = CityName().fake_with_rng(rng);
    let zip: String = ZipCode().fake_with_rng(rng);
    let street = street.as_str().unwrap_or_default();
    Value::String(format!("{street}, {city} {zip}"))
}

fn company_name(rng: &mut dyn RngCore) -> Value {
    text(CompanyName(), rng)
}
fn industry(rng: &mut dyn RngCore) -> Value {
    text(Industry(), rng)
}
fn profession(rng: &mut dyn RngCore) -> Value {
    text(Profession(), rng)
}
fn buzzword(rng: &mut dyn RngCore) -> Value {
    text(Buzzword(), rng)
}
fn catch_phrase(rng: &mut dyn RngCore) -> Value {
    text(CatchPhrase(), rng)
}

fn currency_name(rng: &mut dyn RngCore) -> Value {
    text(CurrencyName(), rng)
}
fn currency_code(rng: &mut dyn RngCore) -> Value {
    text(CurrencyCode(), rng)
}

fn bic(rng: &mut dyn RngCore) -> Value {
    text(Bic(), rng)
}
fn isin(rng: &mut dyn RngCore) -> Value {
    text(Isin(), rng)
}
fn credit_card(rng: &mut dyn RngCore) -> Value {
    text(CreditCardNumber(), rng)
}

const NAME_FIELDS: &[FieldSupplier] = &[
    FieldSupplier { name: "firstName", supply: first_name },
    FieldSupplier { name: "lastName", supply: last_name },
    FieldSupplier { name: "fullName", supply: full_name },
    FieldSupplier { name: "title", supply: name_title },
    FieldSupplier { name: "suffix", supply: name_suffix },
];

const INTERNET_FIELDS: &[FieldSupplier] = &[
    FieldSupplier { name: "emailAddress", supply: email },
    FieldSupplier { name: "freeEmail", supply: free_email },
    FieldSupplier { name: "username", supply: username },
    FieldSupplier { name: "domainName", supply: domain_name },
    FieldSupplier { name: "url", supply: url },
    FieldSupplier { name: "ipAddress", supply: ip_address },
    FieldSupplier { name: "userAgent", supply: user_agent },
];

const ADDRESS_FIELDS: &[FieldSupplier] = &[
    FieldSupplier { name: "streetAddress", supply: street_address },
    FieldSupplier { name: "city", supply: city },
    FieldSupplier { name: "state", supply: state },
    FieldSupplier { name: "zipCode", supply: zip_code },
    FieldSupplier { name: "country", supply: country_name },
    FieldSupplier { name: "countryCode", supply: country_code },
    FieldSupplier { name: "fullAddress", supply: full_address },
];

const COMPANY_FIELDS: &[FieldSupplier] = &[
    FieldSupplier { name: "name", supply: company_name },
    FieldSupplier { name: "industry", supply: industry },
    FieldSupplier { name: "profession", supply: profession },
    FieldSupplier { name: "buzzword", supply: buzzword },
    FieldSupplier { name: "catchPhrase", supply: catch_phrase },
];

const COUNTRY_FIELDS: &[FieldSupplier] = &[
    FieldSupplier { name: "name", supply: country_name },
    FieldSupplier { name: "countryCode", supply: country_code },
    FieldSupplier { name: "currency", supply: currency_name },
    FieldSupplier { name: "currencyCode", supply: currency_code },
];

const FINANCE_FIELDS: &[FieldSupplier] = &[
    FieldSupplier { name: "bic", supply: bic },
    FieldSupplier { name: "isin", supply: isin },
    FieldSupplier { name: "creditCard", supply: credit_card },
];

/// Builds an object with one entry per supplier, in table order.
struct ObjectGenerator {
    id: &'static str,
    suppliers: &'static [FieldSupplier],
}

impl Generator for ObjectGenerator {
    fn id(&self) -> &'static str {
        self.id
    }

    fn generate(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        validate_params(params, &[], self.id)?;
        let mut object = Map::new();
        for supplier in self.suppliers {
            object.insert(supplier.name.to_string(), (supplier.supply)(rng));
        }
        Ok(Value::Object(object))
    }

    fn field_suppliers(&self) -> &'static [FieldSupplier] {
        self.suppliers
    }
}

struct PhoneGenerator;

impl Generator for PhoneGenerator {
    fn id(&self) -> &'static str {
        "phone"
    }

    fn generate(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        let params = validate_params(params, PHONE_PARAMS, "phone")?;
        let value = match params.get_str("format").unwrap_or("default") {
            "default" | "international" => text(PhoneNumber(), rng),
            "cell" | "mobile" => text(CellNumber(), rng),
            "extension" => Value::String(rng.random_range(100..10000).to_string()),
            other => {
                return Err(GenerationError::generator(
                    "phone",
                    format!("unsupported format '{other}'"),
                ));
            }
        };
        Ok(value)
    }
}
