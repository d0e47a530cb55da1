//! Earth Engine expression graphs for export requests.
//!
//! Exports are described to the REST API as a graph of function
//! invocations. Each builder here turns one [`ExportRequest`] variant into a
//! single-node graph:
//!
//! ```text
//! {"result": "0", "values": {"0": <value node>}}
//! ```

use serde_json::{json, Value};

use super::types::{CompositeRequest, ExportRequest, RasterizeRequest, Reducer, TableMergeRequest};
use crate::category::Category;

/// Wraps a value node into a complete expression.
pub fn expression(request: &ExportRequest) -> Value {
    let root = match request {
        ExportRequest::Rasterize(r) => rasterize(r),
        ExportRequest::TableMerge(r) => table_merge(r),
        ExportRequest::Composite(r) => composite(r),
    };
    json!({ "result": "0", "values": { "0": root } })
}

fn constant(value: impl Into<Value>) -> Value {
    json!({ "constantValue": value.into() })
}

fn array(values: Vec<Value>) -> Value {
    json!({ "arrayValue": { "values": values } })
}

fn call(function: &str, arguments: Value) -> Value {
    json!({
        "functionInvocationValue": {
            "functionName": function,
            "arguments": arguments,
        }
    })
}

fn reducer(reducer: Reducer) -> Value {
    match reducer {
        Reducer::Max => call("Reducer.max", json!({})),
    }
}

fn category_filter(category: &Category) -> Value {
    call(
        "Filter.and",
        json!({
            "filters": array(vec![
                call("Filter.equals", json!({
                    "leftField": constant("attribute"),
                    "rightValue": constant(category.attribute.as_str()),
                })),
                call("Filter.equals", json!({
                    "leftField": constant("tag"),
                    "rightValue": constant(category.tag.as_str()),
                })),
            ]),
        }),
    )
}

fn load_table(table: &str) -> Value {
    call("Collection.loadTable", json!({ "tableId": constant(table) }))
}

fn load_image(image: &str) -> Value {
    call("Image.load", json!({ "id": constant(image) }))
}

fn rename(image: Value, name: &str) -> Value {
    call(
        "Image.rename",
        json!({ "input": image, "names": constant(vec![name]) }),
    )
}

fn rasterize(request: &RasterizeRequest) -> Value {
    let features = call(
        "Collection.filter",
        json!({
            "collection": load_table(&request.table),
            "filter": category_filter(&request.category),
        }),
    );
    let burned = call(
        "Collection.reduceToImage",
        json!({
            "collection": features,
            "properties": constant(vec![request.burn_property.as_str()]),
            "reducer": reducer(request.reducer),
        }),
    );
    let gridded = call(
        "Image.reproject",
        json!({
            "image": burned,
            "crs": call("Projection", json!({ "crs": constant(request.crs.as_str()) })),
            "scale": constant(request.scale_meters),
        }),
    );
    rename(gridded, &request.category.band_name())
}

fn table_merge(request: &TableMergeRequest) -> Value {
    let merged = request
        .sources
        .iter()
        .map(|table| load_table(table))
        .reduce(|acc, next| {
            call(
                "Collection.merge",
                json!({ "collection1": acc, "collection2": next }),
            )
        })
        .unwrap_or_else(|| call("Collection", json!({ "features": array(vec![]) })));

    let filters = request.categories.iter().map(category_filter).collect();
    call(
        "Collection.filter",
        json!({
            "collection": merged,
            "filter": call("Filter.or", json!({ "filters": array(filters) })),
        }),
    )
}

fn composite(request: &CompositeRequest) -> Value {
    let projection = call(
        "Image.projection",
        json!({ "image": load_image(&request.projection_from) }),
    );

    // Image.addBands appends, so folding in order keeps band positions.
    request
        .bands
        .iter()
        .map(|band| {
            let inputs = band
                .sources
                .iter()
                .map(|source| {
                    let selected = call(
                        "Image.select",
                        json!({
                            "input": load_image(&source.image),
                            "bandSelectors": constant(vec![source.band]),
                        }),
                    );
                    rename(selected, &band.name)
                })
                .collect();
            let reduced = call(
                "ImageCollection.reduce",
                json!({
                    "collection": call("ImageCollection.fromImages", json!({ "images": array(inputs) })),
                    "reducer": reducer(request.reducer),
                }),
            );
            let reprojected = call(
                "Image.reproject",
                json!({ "image": reduced, "crs": projection.clone() }),
            );
            rename(reprojected, &band.name)
        })
        .reduce(|acc, band| {
            call("Image.addBands", json!({ "dstImg": acc, "srcImg": band }))
        })
        .unwrap_or_else(|| call("Image.constant", json!({ "value": constant(0) })))
}
