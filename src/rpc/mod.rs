// instancetool/src/rpc/mod.rs
//! Minimal XML-RPC client for the application server's `db`, `common` and
//! `object` services.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::errors::RpcError;

/// Database dumps can take a long time to produce server-side.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3000);

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(String),
    Double(f64),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Struct(members) => Some(members),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

/// `[field, operator, value]` search domain term.
pub fn domain_term(field: &str, operator: &str, value: impl Into<Value>) -> Value {
    Value::Array(vec![field.into(), operator.into(), value.into()])
}

pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    xml.push_str(&quick_xml::escape::escape(method));
    xml.push_str("</methodName><params>");
    for param in params {
        xml.push_str("<param>");
        encode_value(&mut xml, param);
        xml.push_str("</param>");
    }
    xml.push_str("</params></methodCall>");
    xml
}

fn encode_value(xml: &mut String, value: &Value) {
    xml.push_str("<value>");
    match value {
        Value::Int(i) => {
            let _ = write!(xml, "<int>{i}</int>");
        }
        Value::Bool(b) => {
            let _ = write!(xml, "<boolean>{}</boolean>", u8::from(*b));
        }
        Value::String(s) => {
            let _ = write!(xml, "<string>{}</string>", quick_xml::escape::escape(s.as_str()));
        }
        Value::Double(d) => {
            let _ = write!(xml, "<double>{d}</double>");
        }
        Value::Array(items) => {
            xml.push_str("<array><data>");
            for item in items {
                encode_value(xml, item);
            }
            xml.push_str("</data></array>");
        }
        Value::Struct(members) => {
            xml.push_str("<struct>");
            for (name, member) in members {
                let _ = write!(xml, "<member><name>{}</name>", quick_xml::escape::escape(name.as_str()));
                encode_value(xml, member);
                xml.push_str("</member>");
            }
            xml.push_str("</struct>");
        }
        Value::Nil => xml.push_str("<nil/>"),
    }
    xml.push_str("</value>");
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn child(&self, name: &str) -> Result<&Node, RpcError> {
        self.children
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| RpcError::Malformed(format!("<{}> without <{}>", self.name, name)))
    }
}

fn parse_tree(body: &str) -> Result<Node, RpcError> {
    let mut reader = Reader::from_str(body);
    let mut stack: Vec<Node> = vec![Node::default()];

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(Node {
                name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                ..Node::default()
            }),
            Event::Empty(e) => {
                let node = Node {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..Node::default()
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .filter(|_| !stack.is_empty())
                    .ok_or_else(|| RpcError::Malformed("unbalanced closing tag".into()))?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Text(t) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(document), true) => Ok(document),
        _ => Err(RpcError::Malformed("unclosed element".into())),
    }
}

fn decode_value(node: &Node) -> Result<Value, RpcError> {
    // A <value> without a type element is a string.
    let Some(typed) = node.children.first() else {
        return Ok(Value::String(node.text.clone()));
    };
    let text = typed.text.trim();
    let value = match typed.name.as_str() {
        "int" | "i4" | "i8" => Value::Int(
            text.parse()
                .map_err(|_| RpcError::Malformed(format!("bad integer '{text}'")))?,
        ),
        "boolean" => Value::Bool(match text {
            "1" => true,
            "0" => false,
            other => return Err(RpcError::Malformed(format!("bad boolean '{other}'"))),
        }),
        "double" => Value::Double(
            text.parse()
                .map_err(|_| RpcError::Malformed(format!("bad double '{text}'")))?,
        ),
        "string" | "base64" | "dateTime.iso8601" => Value::String(typed.text.clone()),
        "nil" => Value::Nil,
        "array" => {
            let data = typed.child("data")?;
            Value::Array(
                data.children
                    .iter()
                    .filter(|c| c.name == "value")
                    .map(decode_value)
                    .collect::<Result<_, _>>()?,
            )
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed.children.iter().filter(|c| c.name == "member") {
                let name = member.child("name")?.text.clone();
                members.insert(name, decode_value(member.child("value")?)?);
            }
            Value::Struct(members)
        }
        other => return Err(RpcError::Malformed(format!("unknown value type <{other}>"))),
    };
    Ok(value)
}

/// Decodes a `methodResponse`, turning a `<fault>` into [`RpcError::Fault`].
pub fn decode_response(body: &str) -> Result<Value, RpcError> {
    let document = parse_tree(body)?;
    let response = document.child("methodResponse")?;

    if let Ok(fault) = response.child("fault") {
        let fault = decode_value(fault.child("value")?)?;
        let members = fault
            .as_struct()
            .ok_or_else(|| RpcError::Malformed("fault is not a struct".into()))?;
        let code = match members.get("faultCode") {
            Some(Value::Int(code)) => *code,
            Some(Value::String(code)) => code.trim().parse().unwrap_or(0),
            _ => 0,
        };
        let message = members
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(RpcError::Fault { code, message });
    }

    let value = response.child("params")?.child("param")?.child("value")?;
    decode_value(value)
}

#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    base: Url,
}

impl RpcClient {
    pub fn new(host: &str, port: u16) -> Result<Self, RpcError> {
        let base = Url::parse(&format!("http://{host}:{port}/"))?;
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub async fn call(&self, service: &str, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let url = self.base.join(&format!("xmlrpc/{service}"))?;
        debug!("XML-RPC {} {}.{}", self.base, service, method);
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(encode_call(method, params))
            .send()
            .await?
            .error_for_status()?;
        decode_response(&response.text().await?)
    }

    pub async fn server_version(&self) -> Result<String, RpcError> {
        let version = self.call("db", "server_version", &[]).await?;
        version
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Malformed("server_version is not a string".into()))
    }

    pub async fn database_exists(&self, database: &str) -> Result<bool, RpcError> {
        let exists = self.call("db", "db_exist", &[database.into()]).await?;
        exists
            .as_bool()
            .ok_or_else(|| RpcError::Malformed("db_exist is not a boolean".into()))
    }

    /// Base64 text of the server-side dump (a zip holding `dump.sql`).
    pub async fn dump_database(&self, super_password: &str, database: &str) -> Result<String, RpcError> {
        let dump = self
            .call("db", "dump", &[super_password.into(), database.into()])
            .await?;
        match dump {
            Value::String(text) => Ok(text),
            _ => Err(RpcError::Malformed("dump is not a string".into())),
        }
    }

    /// Creates `database` from a base64 dump such as [`Self::dump_database`]
    /// returns. The server unpacks the attachments itself.
    pub async fn restore_database(
        &self,
        super_password: &str,
        database: &str,
        encoded: &str,
    ) -> Result<(), RpcError> {
        let answer = self
            .call("db", "restore", &[super_password.into(), database.into(), encoded.into()])
            .await?;
        debug!("db.restore answered {:?}", answer);
        Ok(())
    }

    pub async fn login(&self, database: &str, user: &str, password: &str) -> Result<Session, RpcError> {
        let uid = self
            .call("common", "login", &[database.into(), user.into(), password.into()])
            .await?;
        match uid {
            Value::Int(uid) => Ok(Session {
                client: self.clone(),
                database: database.to_string(),
                uid,
                password: password.to_string(),
            }),
            _ => Err(RpcError::LoginRefused(user.to_string())),
        }
    }
}

/// An authenticated user on one database.
#[derive(Debug, Clone)]
pub struct Session {
    client: RpcClient,
    database: String,
    uid: i64,
    password: String,
}

impl Session {
    pub fn uid(&self) -> i64 {
        self.uid
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub async fn execute(&self, model: &str, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        let mut params: Vec<Value> = vec![
            self.database.as_str().into(),
            self.uid.into(),
            self.password.as_str().into(),
            model.into(),
            method.into(),
        ];
        params.extend(args);
        self.client.call("object", "execute", &params).await
    }

    pub async fn search(&self, model: &str, domain: Vec<Value>) -> Result<Vec<i64>, RpcError> {
        let ids = self.execute(model, "search", vec![Value::Array(domain)]).await?;
        ids.as_array()
            .ok_or_else(|| RpcError::Malformed(format!("{model}.search did not return a list")))?
            .iter()
            .map(|id| {
                id.as_i64()
                    .ok_or_else(|| RpcError::Malformed(format!("{model}.search returned a non-integer id")))
            })
            .collect()
    }

    pub async fn write(&self, model: &str, ids: &[i64], values: BTreeMap<String, Value>) -> Result<(), RpcError> {
        let ids = ids.iter().copied().map(Value::Int).collect::<Vec<_>>();
        self.execute(model, "write", vec![Value::Array(ids), Value::Struct(values)])
            .await?;
        Ok(())
    }

    pub async fn has_field(&self, model: &str, field: &str) -> Result<bool, RpcError> {
        let fields = self
            .execute(model, "fields_get", vec![Value::Array(vec![field.into()])])
            .await?;
        Ok(fields.as_struct().is_some_and(|f| f.contains_key(field)))
    }
}
