//! Built-in plan for the PostgreSQL `dvdrental` sample database
//!
//! Pipelines are written in the JSON stage syntax so they read the same as
//! the queries a document store user would type.

use serde_json::{Value, json};

use crate::aggregation::{Pipeline, PipelineResult};
use crate::document::Filter;
use crate::store::Update;

use super::plan::{CascadeDelete, Dependent, MigrationPlan, Mutation, Owner};

/// Films shorter than this many minutes are deleted by default
pub const DEFAULT_SHORT_FILM_MINUTES: i64 = 60;

/// `lookup` + `unwind` keeping unmatched parents
fn join(from: &str, local: &str, foreign: &str, alias: &str) -> [Value; 2] {
    [
        json!({"$lookup": {"from": from, "localField": local, "foreignField": foreign, "as": alias}}),
        json!({"$unwind": {"path": format!("${alias}"), "preserveNullAndEmptyArrays": true}}),
    ]
}

/// Count documents per key, keeping the key under its own name
fn count_by(key: &str) -> Value {
    json!({"$group": {"_id": format!("${key}"), "count": {"$sum": 1}, key: {"$first": format!("${key}")}}})
}

/// Sum a field per key, keeping the key under its own name
fn sum_by(key: &str, field: &str) -> Value {
    json!({"$group": {"_id": format!("${key}"), "count": {"$sum": format!("${field}")}, key: {"$first": format!("${key}")}}})
}

fn top(n: u64) -> [Value; 2] {
    [json!({"$sort": {"count": -1}}), json!({"$limit": n})]
}

fn pipeline(stages: Vec<Value>) -> PipelineResult<Pipeline> {
    Pipeline::from_json(&Value::Array(stages))
}

fn count_films() -> PipelineResult<Pipeline> {
    pipeline(vec![json!({"$count": "film"})])
}

fn count_films_location() -> PipelineResult<Pipeline> {
    pipeline(vec![
        json!({"$group": {"_id": "$store_id", "count": {"$sum": 1}}}),
        json!({"$project": {"_id": 0, "store_id": "$_id", "count": 1}}),
    ])
}

fn find_top_actors() -> PipelineResult<Pipeline> {
    let mut stages = vec![count_by("actor_id")];
    stages.extend(top(10));
    stages.extend(join("actor", "actor_id", "actor_id", "actor"));
    stages.push(json!({"$addFields": {"fullName": {"$concat": ["$actor.first_name", " ", "$actor.last_name"]}}}));
    stages.push(json!({"$project": {"_id": 0, "name": "$fullName", "count": "$count"}}));
    pipeline(stages)
}

fn find_revenue() -> PipelineResult<Pipeline> {
    let mut stages = vec![sum_by("staff_id", "amount")];
    stages.extend(join("staff", "staff_id", "staff_id", "staff"));
    stages.push(json!({"$addFields": {"fullName": {"$concat": ["$staff.first_name", " ", "$staff.last_name"]}}}));
    stages.push(json!({"$project": {
        "_id": 0,
        "name": "$fullName",
        "revenue": {"$round": ["$count", 2]},
        "staff_id": 1
    }}));
    pipeline(stages)
}

fn find_most_rentals() -> PipelineResult<Pipeline> {
    let mut stages = vec![count_by("customer_id")];
    stages.extend(top(10));
    stages.push(json!({"$project": {"_id": 0, "customer_id": 1, "count": "$count"}}));
    pipeline(stages)
}

/// Office location prefers `address` and falls back to `address2`
///
/// The presence check compares with `$gte` against the empty string, so an
/// empty primary line still counts as present.
fn find_big_spender() -> PipelineResult<Pipeline> {
    let mut stages = vec![sum_by("customer_id", "amount")];
    stages.extend(top(10));
    stages.extend(join("customer", "customer_id", "customer_id", "customer"));
    stages.extend(join("store", "customer.store_id", "store_id", "store"));
    stages.extend(join("address", "store.address_id", "address_id", "address"));
    stages.extend(join("city", "address.city_id", "city_id", "city"));
    stages.push(json!({"$addFields": {
        "fullName": {"$concat": ["$customer.first_name", " ", "$customer.last_name"]},
        "officeLocation": {"$concat": [
            {"$cond": {
                "if": {"$gte": ["$address.address", ""]},
                "then": "$address.address",
                "else": "$address.address2"
            }},
            " ,", "$address.postal_code", " ", "$city.city"
        ]}
    }}));
    stages.push(json!({"$project": {
        "_id": 0,
        "name": "$fullName",
        "revenue": {"$round": ["$count", 2]},
        "office location": "$officeLocation"
    }}));
    pipeline(stages)
}

fn find_popular_titles() -> PipelineResult<Pipeline> {
    let mut stages = vec![count_by("inventory_id")];
    stages.extend(top(10));
    stages.extend(join("inventory", "inventory_id", "inventory_id", "inventory"));
    stages.extend(join("film", "inventory.film_id", "film_id", "film"));
    stages.push(json!({"$project": {"_id": 0, "title": "$film.title", "view numbers": "$count"}}));
    pipeline(stages)
}

fn find_popular_category() -> PipelineResult<Pipeline> {
    pipeline(vec![
        json!({"$lookup": {"from": "inventory", "localField": "inventory_id", "foreignField": "inventory_id", "as": "inventory"}}),
        json!({"$lookup": {"from": "film_category", "localField": "inventory.film_id", "foreignField": "film_id", "as": "film_category"}}),
        json!({"$lookup": {"from": "category", "localField": "film_category.category_id", "foreignField": "category_id", "as": "category"}}),
        json!({"$unwind": {"path": "$category", "preserveNullAndEmptyArrays": true}}),
        json!({"$group": {"_id": "$film_category.category_id", "count": {"$sum": 1}, "name": {"$first": "$category.name"}}}),
        json!({"$sort": {"count": -1}}),
        json!({"$limit": 3}),
        json!({"$project": {"_id": 0, "category": "$name", "view numbers": "$count"}}),
    ])
}

/// The relational `customer_list` view rebuilt on `customer`
pub fn customer_list() -> PipelineResult<Pipeline> {
    let mut stages = Vec::new();
    stages.extend(join("address", "address_id", "address_id", "address"));
    stages.extend(join("city", "address.city_id", "city_id", "city"));
    stages.extend(join("country", "city.country_id", "country_id", "country"));
    stages.push(json!({"$addFields": {
        "fullName": {"$concat": ["$first_name", " ", "$last_name"]},
        "notes": {"$cond": {"if": "$activebool", "then": "active", "else": ""}}
    }}));
    stages.push(json!({"$project": {
        "_id": 1,
        "customer_id": 1,
        "name": "$fullName",
        "address": "$address.address",
        "zip code": "$address.postal_code",
        "phone": "$address.phone",
        "city": "$city.city",
        "country": "$country.country",
        "notes": "$notes",
        "sid": "$store_id"
    }}));
    pipeline(stages)
}

/// Inventory items whose film is shorter than `minutes`
pub fn short_film_inventory(minutes: i64) -> PipelineResult<Pipeline> {
    pipeline(vec![
        json!({"$lookup": {"from": "film", "localField": "film_id", "foreignField": "film_id", "as": "film"}}),
        json!({"$match": {"film.length": {"$lt": minutes}}}),
    ])
}

impl MigrationPlan {
    /// Reads, view, mutations and short-film cascade for `dvdrental`
    pub fn dvdrental(short_film_minutes: i64) -> PipelineResult<Self> {
        let plan = MigrationPlan::new()
            .with_read("count_films", "film", count_films()?)
            .with_read("count_films_location", "inventory", count_films_location()?)
            .with_read("find_top_actors", "film_actor", find_top_actors()?)
            .with_read("find_revenue", "payment", find_revenue()?)
            .with_read("find_most_rentals", "rental", find_most_rentals()?)
            .with_read("find_big_spender", "payment", find_big_spender()?)
            .with_read("find_popular_titles", "rental", find_popular_titles()?)
            .with_read("find_popular_category", "rental", find_popular_category()?)
            .with_view("customer_list", "customer", customer_list()?)
            .with_mutation(
                Mutation::regenerate_secret("regenerate_staff_passwords", "staff", "staff_id", "password")
                    .touching("last_update"),
            )
            .with_mutation(
                Mutation::insert(
                    "create_address",
                    "address",
                    json!({
                        "address_id": 6969,
                        "address": "69 Mongo Drive",
                        "district": "Alberta",
                        "city_id": 300,
                        "postal_code": "",
                        "phone": ""
                    }),
                )
                .touching("last_update"),
            )
            .with_mutation(
                Mutation::insert(
                    "create_store",
                    "store",
                    json!({"store_id": 69, "manager_staff_id": 1, "address_id": 6969}),
                )
                .touching("last_update"),
            )
            .with_mutation(
                Mutation::update_many(
                    "move_inventory",
                    "inventory",
                    Filter::All,
                    Update::new().set("store_id", 69),
                )
                .touching("last_update"),
            )
            .with_cascade(
                CascadeDelete::new(
                    "delete_short_films",
                    "inventory",
                    "inventory_id",
                    short_film_inventory(short_film_minutes)?,
                )
                .with_dependent(
                    Dependent::new("rental", "inventory_id")
                        .with_dependent("rental_id", Dependent::new("payment", "rental_id")),
                )
                .with_owner(Owner::new("film", "film_id", "film_id"))
                .with_sweep("film", Filter::lt("length", short_film_minutes)),
            );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dvdrental_plan_parses() {
        let plan = MigrationPlan::dvdrental(DEFAULT_SHORT_FILM_MINUTES).unwrap();
        let names: Vec<&str> = plan.reads.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "count_films",
                "count_films_location",
                "find_top_actors",
                "find_revenue",
                "find_most_rentals",
                "find_big_spender",
                "find_popular_titles",
                "find_popular_category"
            ]
        );
        assert_eq!(plan.views.len(), 1);
        assert_eq!(plan.mutations.len(), 4);
        assert_eq!(
            plan.cascades[0].deletion_order(),
            vec!["payment", "rental", "inventory", "film"]
        );
    }

    #[test]
    fn test_big_spender_joins_customer_once() {
        let pipeline = find_big_spender().unwrap();
        let lookups = pipeline
            .stages()
            .iter()
            .filter(|s| s.name() == "$lookup")
            .count();
        assert_eq!(lookups, 4);
        assert_eq!(
            pipeline.describe(),
            "$group -> $sort -> $limit -> $lookup -> $unwind -> $lookup -> $unwind -> $lookup -> $unwind -> $lookup -> $unwind -> $addFields -> $project"
        );
    }

    #[test]
    fn test_customer_list_shape() {
        let pipeline = customer_list().unwrap();
        assert_eq!(pipeline.len(), 8);
        assert_eq!(pipeline.stages()[7].name(), "$project");
    }
}
