//! OpenAPI 3 document generated from the compiled registry.

use crate::dsl::Verb;
use crate::registry::{Registry, Resource};
use std::collections::BTreeMap;
use utoipa::openapi::content::{Content, ContentBuilder};
use utoipa::openapi::info::InfoBuilder;
use utoipa::openapi::path::{Operation, OperationBuilder, ParameterBuilder, ParameterIn, PathItem, PathsBuilder};
use utoipa::openapi::request_body::RequestBodyBuilder;
use utoipa::openapi::response::{Response, ResponseBuilder};
use utoipa::openapi::schema::{ObjectBuilder, Schema, Type};
use utoipa::openapi::{OpenApi, OpenApiBuilder, RefOr, Required};

fn schema(object: ObjectBuilder) -> RefOr<Schema> {
    RefOr::T(Schema::Object(object.build()))
}

fn json_content(name: &str) -> Content {
    let object = ObjectBuilder::new().schema_type(Type::Object).title(Some(name));
    ContentBuilder::new().schema(Some(schema(object))).build()
}

fn error_response(description: &str) -> Response {
    ResponseBuilder::new()
        .description(description)
        .content("application/json", json_content("Error"))
        .build()
}

/// `/users/:user` -> `/users/{user}`
fn openapi_path(path: &str) -> String {
    path.split('/')
        .map(|seg| match seg.strip_prefix(':') {
            Some(name) => format!("{{{}}}", name),
            None => seg.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn operation(resource: &Resource, verb: Verb) -> Operation {
    let action = resource.spec.action(verb);
    let mut op = OperationBuilder::new()
        .operation_id(Some(format!("{}_{}", verb, resource.endpoint)))
        .summary(Some(format!("{} {}", verb, resource.name)))
        .tag(resource.name.clone());

    if verb.is_item() {
        op = op.parameter(
            ParameterBuilder::new()
                .name(resource.param.clone())
                .parameter_in(ParameterIn::Path)
                .required(Required::True)
                .schema(Some(schema(ObjectBuilder::new().schema_type(Type::String)))),
        );
    }
    if verb == Verb::List {
        for name in ["limit", "offset"] {
            op = op.parameter(
                ParameterBuilder::new()
                    .name(name)
                    .parameter_in(ParameterIn::Query)
                    .required(Required::False)
                    .schema(Some(schema(ObjectBuilder::new().schema_type(Type::Integer)))),
            );
        }
    }
    if matches!(verb, Verb::Create | Verb::Update | Verb::Patch) {
        op = op.request_body(Some(
            RequestBodyBuilder::new()
                .content("application/json", json_content(action.request_type.name))
                .required(Some(Required::True))
                .build(),
        ));
    }

    let status = verb.success_status();
    let success = if status.as_u16() == 204 {
        ResponseBuilder::new().description("No content").build()
    } else {
        ResponseBuilder::new()
            .description(format!("{} succeeded", verb))
            .content("application/json", json_content(action.response_type.name))
            .build()
    };
    op = op.response(status.as_u16().to_string(), success);
    for (code, description) in [
        ("400", "Bad request"),
        ("401", "Unauthenticated"),
        ("403", "Forbidden"),
        ("404", "Not found"),
        ("409", "Conflict"),
        ("500", "Internal error"),
    ] {
        op = op.response(code, error_response(description));
    }
    op.build()
}

fn attach(item: &mut PathItem, verb: Verb, op: Operation) {
    match verb {
        Verb::Create => item.post = Some(op),
        Verb::List | Verb::Get => item.get = Some(op),
        Verb::Update => item.put = Some(op),
        Verb::Patch => item.patch = Some(op),
        Verb::Delete => item.delete = Some(op),
    }
}

/// Document covering every enabled route, grouped by path.
pub fn document(registry: &Registry, title: &str) -> OpenApi {
    let mut items: BTreeMap<String, PathItem> = BTreeMap::new();
    for resource in registry.enumerate() {
        for route in resource.routes() {
            let item = items.entry(openapi_path(&route.path)).or_default();
            attach(item, route.verb, operation(resource, route.verb));
        }
    }
    let paths = items
        .into_iter()
        .fold(PathsBuilder::new(), |paths, (path, item)| paths.path(path, item));
    OpenApiBuilder::new()
        .info(InfoBuilder::new().title(title).version(env!("CARGO_PKG_VERSION")).build())
        .paths(paths)
        .build()
}
